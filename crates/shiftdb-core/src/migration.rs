use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use shiftdb_common::{Error, Result};

use crate::fs::MigrationFs;

const UP_MARKER: &str = "-- migrate:up";
const DOWN_MARKER: &str = "-- migrate:down";

static MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*--\s*migrate:(up|down)(?:\s+(.*?))?\s*$").expect("marker pattern is valid")
});

/// A migration file found during discovery.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: String,
    pub file_name: String,
    /// The root joined with the file name, relative or absolute exactly as
    /// the root was configured.
    pub file_path: PathBuf,
    /// Whether the ledger records this version. Filled in per query.
    pub applied: bool,
    fs: Arc<dyn MigrationFs>,
    overlay: bool,
}

impl Migration {
    pub(crate) fn new(
        version: String,
        file_name: String,
        file_path: PathBuf,
        fs: Arc<dyn MigrationFs>,
        overlay: bool,
    ) -> Self {
        Self {
            version,
            file_name,
            file_path,
            applied: false,
            fs,
            overlay,
        }
    }

    /// True when the file lives in an injected filesystem overlay rather
    /// than on disk.
    pub fn is_overlay(&self) -> bool {
        self.overlay
    }

    pub fn read(&self) -> Result<String> {
        Ok(self.fs.read_to_string(&self.file_path)?)
    }

    pub fn parse(&self) -> Result<ParsedMigration> {
        let contents = self.read()?;
        ParsedMigration::parse(&self.file_name, &contents)
    }

    pub(crate) fn remove(&self) -> Result<()> {
        Ok(self.fs.remove_file(&self.file_path)?)
    }
}

/// Options trailing a `-- migrate:up` or `-- migrate:down` marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockOptions {
    transaction: bool,
}

impl Default for BlockOptions {
    fn default() -> Self {
        Self { transaction: true }
    }
}

impl BlockOptions {
    /// Whether the block runs inside a transaction together with its ledger
    /// update.
    pub fn transaction(&self) -> bool {
        self.transaction
    }

    fn from_tokens(tokens: &str) -> Self {
        let mut options = Self::default();
        for token in tokens.split_whitespace() {
            if let Some(("transaction", value)) = token.split_once(':') {
                options.transaction = value != "false";
            }
        }
        options
    }
}

/// One direction of a migration: the raw SQL including its marker line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub sql: String,
    pub options: BlockOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMigration {
    pub up: Block,
    pub down: Block,
}

struct Marker {
    offset: usize,
    options: BlockOptions,
}

impl ParsedMigration {
    /// Split migration text into its up and down blocks.
    ///
    /// Exactly one up marker and one down marker are required, up first.
    /// Text before the up marker is ignored.
    pub fn parse(name: &str, contents: &str) -> Result<Self> {
        let fail = |reason: String| Error::Parse {
            path: name.to_string(),
            reason,
        };

        let mut up: Option<Marker> = None;
        let mut down: Option<Marker> = None;
        let mut offset = 0;

        for line in contents.split_inclusive('\n') {
            let start = offset;
            offset += line.len();

            let Some(caps) = MARKER.captures(line.trim_end_matches(['\n', '\r'])) else {
                continue;
            };
            let marker = Marker {
                offset: start,
                options: BlockOptions::from_tokens(caps.get(2).map_or("", |m| m.as_str())),
            };

            if &caps[1] == "up" {
                if up.is_some() {
                    return Err(fail(format!("found more than one '{UP_MARKER}' marker")));
                }
                if down.is_some() {
                    return Err(fail(format!(
                        "'{UP_MARKER}' must appear before '{DOWN_MARKER}'"
                    )));
                }
                up = Some(marker);
            } else {
                if down.is_some() {
                    return Err(fail(format!("found more than one '{DOWN_MARKER}' marker")));
                }
                down = Some(marker);
            }
        }

        let up = up.ok_or_else(|| fail(format!("missing '{UP_MARKER}' marker")))?;
        let down = down.ok_or_else(|| fail(format!("missing '{DOWN_MARKER}' marker")))?;
        if down.offset < up.offset {
            return Err(fail(format!(
                "'{UP_MARKER}' must appear before '{DOWN_MARKER}'"
            )));
        }

        Ok(Self {
            up: Block {
                sql: contents[up.offset..down.offset].to_string(),
                options: up.options,
            },
            down: Block {
                sql: contents[down.offset..].to_string(),
                options: down.options,
            },
        })
    }
}
