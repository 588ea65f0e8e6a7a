//! The fixed folder table.
//!
//! Every mailbox a client can LIST or SELECT is defined here. Real folders
//! map to an object-store key prefix; virtual folders are computed views
//! over the real ones and own no keys of their own.

/// Where a folder's messages come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderSource {
    /// Listing of a single key prefix
    Prefix(&'static str),
    /// Union of every real folder, de-duplicated by storage key
    AllMail,
    /// Union filtered to messages carrying `\Flagged`
    Starred,
    /// Union filtered to `\Important` or `$Important`
    Important,
}

#[derive(Debug)]
pub struct Folder {
    pub name: &'static str,
    pub source: FolderSource,
    /// LIST attributes, rendered verbatim inside the parenthesized list
    pub attributes: &'static str,
}

impl Folder {
    pub fn is_virtual(&self) -> bool {
        !matches!(self.source, FolderSource::Prefix(_))
    }

    /// Key prefix for real folders, `None` for virtual ones.
    pub fn prefix(&self) -> Option<&'static str> {
        match self.source {
            FolderSource::Prefix(prefix) => Some(prefix),
            _ => None,
        }
    }
}

/// All folders, in LIST order. INBOX first, virtual views after the
/// special-use set, category folders last.
pub const FOLDERS: &[Folder] = &[
    Folder {
        name: "INBOX",
        source: FolderSource::Prefix("incoming/"),
        attributes: "\\HasNoChildren",
    },
    Folder {
        name: "Sent",
        source: FolderSource::Prefix("sent/"),
        attributes: "\\HasNoChildren \\Sent",
    },
    Folder {
        name: "Drafts",
        source: FolderSource::Prefix("drafts/"),
        attributes: "\\HasNoChildren \\Drafts",
    },
    Folder {
        name: "Trash",
        source: FolderSource::Prefix("trash/"),
        attributes: "\\HasNoChildren \\Trash",
    },
    Folder {
        name: "Junk",
        source: FolderSource::Prefix("junk/"),
        attributes: "\\HasNoChildren \\Junk",
    },
    Folder {
        name: "Archive",
        source: FolderSource::Prefix("archive/"),
        attributes: "\\HasNoChildren \\Archive",
    },
    Folder {
        name: "All Mail",
        source: FolderSource::AllMail,
        attributes: "\\HasNoChildren \\All",
    },
    Folder {
        name: "Starred",
        source: FolderSource::Starred,
        attributes: "\\HasNoChildren \\Flagged",
    },
    Folder {
        name: "Important",
        source: FolderSource::Important,
        attributes: "\\HasNoChildren \\Important",
    },
    Folder {
        name: "Social",
        source: FolderSource::Prefix("categories/social/"),
        attributes: "\\HasNoChildren",
    },
    Folder {
        name: "Forums",
        source: FolderSource::Prefix("categories/forums/"),
        attributes: "\\HasNoChildren",
    },
    Folder {
        name: "Updates",
        source: FolderSource::Prefix("categories/updates/"),
        attributes: "\\HasNoChildren",
    },
    Folder {
        name: "Promotions",
        source: FolderSource::Prefix("categories/promotions/"),
        attributes: "\\HasNoChildren",
    },
];

/// Look up a folder by client-supplied name, case-insensitively.
pub fn resolve(name: &str) -> Option<&'static Folder> {
    FOLDERS
        .iter()
        .find(|folder| folder.name.eq_ignore_ascii_case(name))
}

/// Prefixes backing the virtual union views, in table order.
pub fn real_prefixes() -> impl Iterator<Item = &'static str> {
    FOLDERS.iter().filter_map(|folder| folder.prefix())
}
