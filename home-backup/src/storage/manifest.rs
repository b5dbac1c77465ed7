//! Text format shared by the small bookkeeping files every backend keeps:
//! one comment line followed by one entry per line.

pub const LAST_BACKUP_FILE: &str = "last-backup";
pub const EXISTING_FILES_METADATA: &str = "existing-files-metadata";
pub const VERSION_FILE: &str = "upgrade-version";

pub const LAST_BACKUP_COMMENT: &str = "# This file contains the filename of the last backup.";
pub const EXISTING_FILES_COMMENT: &str = "# This file contains the existing files meta data.";
pub const VERSION_COMMENT: &str = "# This file contains the upgrade version of the home directory.";

const COMMENT_PREFIX: &str = "#";

/// Whether `name` is one of the bookkeeping files rather than a container.
pub fn is_bookkeeping(name: &str) -> bool {
    matches!(name, LAST_BACKUP_FILE | EXISTING_FILES_METADATA | VERSION_FILE)
}

pub fn render<I, S>(comment: &str, entries: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut content = String::from(comment);
    content.push('\n');
    for entry in entries {
        content.push_str(entry.as_ref());
        content.push('\n');
    }
    content
}

/// Entries of a manifest: every non-blank line not starting with `#`,
/// trimmed, in file order.
pub fn parse(content: &str) -> Vec<String> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with(COMMENT_PREFIX))
        .map(|line| line.trim().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_comments_and_blank_lines() {
        let content = "# comment\n\nbackup-1.zip\n  backup-2.zip  \n# another\n\t\n";
        assert_eq!(parse(content), vec!["backup-1.zip", "backup-2.zip"]);
    }

    #[test]
    fn test_parse_keeps_order() {
        let content = render(LAST_BACKUP_COMMENT, ["c.zip", "a.zip", "b.zip"]);
        assert!(content.starts_with(LAST_BACKUP_COMMENT));
        assert_eq!(parse(&content), vec!["c.zip", "a.zip", "b.zip"]);
    }

    #[test]
    fn test_empty_manifest() {
        assert!(parse(&render(EXISTING_FILES_COMMENT, [] as [&str; 0])).is_empty());
        assert!(parse("").is_empty());
    }

    #[test]
    fn test_bookkeeping_names() {
        assert!(is_bookkeeping("last-backup"));
        assert!(is_bookkeeping("existing-files-metadata"));
        assert!(is_bookkeeping("upgrade-version"));
        assert!(!is_bookkeeping("backup-20240101000000.zip"));
    }
}
