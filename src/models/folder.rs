//! Mailbox folder enumeration.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// The closed set of folders a thread can live in.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Folder {
    #[sea_orm(string_value = "INBOX")]
    Inbox,
    #[sea_orm(string_value = "SENT")]
    Sent,
    #[sea_orm(string_value = "DRAFTS")]
    Drafts,
    #[sea_orm(string_value = "TRASH")]
    Trash,
}

impl Folder {
    pub const ALL: [Folder; 4] = [Folder::Inbox, Folder::Sent, Folder::Drafts, Folder::Trash];

    /// Derive the folder from a provider label set.
    ///
    /// Priority is Trash, then Drafts, then Sent; anything else is Inbox.
    /// Label matching is case-insensitive.
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Self {
        let has = |name: &str| labels.iter().any(|l| l.as_ref().eq_ignore_ascii_case(name));

        if has("TRASH") {
            Folder::Trash
        } else if has("DRAFT") || has("DRAFTS") {
            Folder::Drafts
        } else if has("SENT") {
            Folder::Sent
        } else {
            Folder::Inbox
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Folder::Inbox => "INBOX",
            Folder::Sent => "SENT",
            Folder::Drafts => "DRAFTS",
            Folder::Trash => "TRASH",
        }
    }
}

impl std::fmt::Display for Folder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Folder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Folder::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown folder '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_priority() {
        assert_eq!(Folder::from_labels(&["TRASH", "UNREAD"]), Folder::Trash);
        assert_eq!(Folder::from_labels(&["DRAFT"]), Folder::Drafts);
        assert_eq!(Folder::from_labels(&["SENT"]), Folder::Sent);
        assert_eq!(Folder::from_labels::<&str>(&[]), Folder::Inbox);
        assert_eq!(Folder::from_labels(&["INBOX"]), Folder::Inbox);
    }

    #[test]
    fn test_trash_beats_everything() {
        assert_eq!(
            Folder::from_labels(&["SENT", "DRAFT", "INBOX", "TRASH"]),
            Folder::Trash
        );
        assert_eq!(Folder::from_labels(&["SENT", "DRAFT"]), Folder::Drafts);
    }

    #[test]
    fn test_labels_case_insensitive() {
        assert_eq!(Folder::from_labels(&["trash"]), Folder::Trash);
        assert_eq!(Folder::from_labels(&["Sent"]), Folder::Sent);
        assert_eq!(Folder::from_labels(&["CATEGORY_PERSONAL"]), Folder::Inbox);
    }

    #[test]
    fn test_parse_roundtrip_names() {
        for folder in Folder::ALL {
            assert_eq!(folder.as_str().parse::<Folder>().unwrap(), folder);
        }
        assert_eq!("drafts".parse::<Folder>().unwrap(), Folder::Drafts);
        assert!("spam".parse::<Folder>().is_err());
    }
}
