//! Parser for the fixed-column droplet listing that maps addresses to regions.
//!
//! The listing looks like:
//!
//! ```text
//! ID         Name    Public IPv4    Private IPv4   Public IPv6  Memory  VCPUs  Disk  Region  Image                   VPC UUID        Status  Tags
//! 412345678  val-0   164.90.1.2     10.114.0.2                  4096    2      80    fra1    Ubuntu 22.04 (LTS) x64  5b1c-...-9f2e   active
//! ```
//!
//! Each line is matched against [`COLUMNS`], an ordered grammar of named
//! columns with an expected value shape. A line that does not fit is reported
//! with the column that failed and skipped.

use std::collections::HashMap;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::LazyLock;

use color_eyre::eyre::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::utils::ip_utils::{is_valid_ip, is_valid_ipv4};

/// Expected shape of a column value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnShape {
    /// Unsigned decimal integer
    Integer,
    /// Any whitespace-free token
    Token,
    /// Dotted IPv4 address
    Ipv4,
    /// IP address, or nothing at all
    OptionalAddress,
    /// `\w+`
    Word,
    /// Free text of one or more tokens; takes the shortest match
    FreeText,
    /// `[\w-]+`
    Slug,
    /// Whatever is left on the line, possibly empty
    Rest,
}

impl ColumnShape {
    /// Whether a single token has this shape
    pub fn accepts(self, token: &str) -> bool {
        match self {
            ColumnShape::Integer => !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()),
            ColumnShape::Token | ColumnShape::FreeText | ColumnShape::Rest => !token.is_empty(),
            ColumnShape::Ipv4 => is_valid_ipv4(token),
            ColumnShape::OptionalAddress => is_valid_ip(token),
            ColumnShape::Word => WORD.is_match(token),
            ColumnShape::Slug => SLUG.is_match(token),
        }
    }

    fn expectation(self) -> &'static str {
        match self {
            ColumnShape::Integer => "is not an integer",
            ColumnShape::Ipv4 => "is not an IPv4 address",
            ColumnShape::OptionalAddress => "is not an IP address",
            ColumnShape::Word => "is not a single word",
            ColumnShape::Slug => "is not an identifier",
            ColumnShape::Token | ColumnShape::FreeText | ColumnShape::Rest => "is empty",
        }
    }
}

/// A named column of the listing
#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub shape: ColumnShape,
}

/// The column grammar, in line order
pub const COLUMNS: [Column; 13] = [
    Column { name: "ID", shape: ColumnShape::Integer },
    Column { name: "Name", shape: ColumnShape::Token },
    Column { name: "Public IPv4", shape: ColumnShape::Ipv4 },
    Column { name: "Private IPv4", shape: ColumnShape::Ipv4 },
    Column { name: "Public IPv6", shape: ColumnShape::OptionalAddress },
    Column { name: "Memory", shape: ColumnShape::Integer },
    Column { name: "VCPUs", shape: ColumnShape::Integer },
    Column { name: "Disk", shape: ColumnShape::Integer },
    Column { name: "Region", shape: ColumnShape::Word },
    Column { name: "Image", shape: ColumnShape::FreeText },
    Column { name: "VPC UUID", shape: ColumnShape::Slug },
    Column { name: "Status", shape: ColumnShape::Word },
    Column { name: "Tags", shape: ColumnShape::Rest },
];

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\w+$").expect("Invalid word regex"));
static SLUG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[\w-]+$").expect("Invalid slug regex"));

/// One parsed line of the listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionTableRow {
    pub id: u64,
    pub name: String,
    pub public_ipv4: Ipv4Addr,
    pub private_ipv4: Ipv4Addr,
    pub public_ipv6: Option<String>,
    pub memory: u64,
    pub vcpus: u64,
    pub disk: u64,
    pub region: String,
    pub image: String,
    pub vpc_uuid: String,
    pub status: String,
    pub tags: String,
}

/// A line that did not fit the column grammar
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line_number}: column `{column}` {reason} (value: {value:?})")]
pub struct LineRejection {
    pub line_number: usize,
    pub column: &'static str,
    pub value: String,
    pub reason: &'static str,
}

/// Result of parsing a whole listing
#[derive(Debug, Clone, Default)]
pub struct RegionTableParse {
    pub rows: Vec<RegionTableRow>,
    pub rejected: Vec<LineRejection>,
}

/// Lookup from public IPv4 address to region
#[derive(Debug, Clone, Default)]
pub struct RegionTable {
    by_ip: HashMap<String, String>,
}

impl RegionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later rows win when an address is listed twice
    pub fn from_rows(rows: &[RegionTableRow]) -> Self {
        let mut table = Self::new();
        for row in rows {
            table.insert(row.public_ipv4.to_string(), row.region.clone());
        }
        table
    }

    pub fn insert(&mut self, ip: impl Into<String>, region: impl Into<String>) {
        self.by_ip.insert(ip.into(), region.into());
    }

    pub fn region_for(&self, ip: &str) -> Option<&str> {
        self.by_ip.get(ip).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_ip.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ip.is_empty()
    }
}

/// Walks the tokens of one line column by column
struct LineCursor<'a> {
    line_number: usize,
    tokens: Vec<&'a str>,
    pos: usize,
}

impl<'a> LineCursor<'a> {
    fn reject(&self, column: &Column, value: &str, reason: &'static str) -> LineRejection {
        LineRejection {
            line_number: self.line_number,
            column: column.name,
            value: value.to_string(),
            reason,
        }
    }

    fn column(&mut self, column: &Column) -> Result<&'a str, LineRejection> {
        let token = self
            .tokens
            .get(self.pos)
            .copied()
            .ok_or_else(|| self.reject(column, "", "is missing"))?;
        if !column.shape.accepts(token) {
            return Err(self.reject(column, token, column.shape.expectation()));
        }
        self.pos += 1;
        Ok(token)
    }

    fn integer(&mut self, column: &Column) -> Result<u64, LineRejection> {
        let token = self.column(column)?;
        token
            .parse()
            .map_err(|_| self.reject(column, token, "is out of range"))
    }

    fn ipv4(&mut self, column: &Column) -> Result<Ipv4Addr, LineRejection> {
        let token = self.column(column)?;
        token
            .parse()
            .map_err(|_| self.reject(column, token, column.shape.expectation()))
    }

    /// Consumes the column only when the next token has its shape
    fn optional(&mut self, column: &Column) -> Option<String> {
        let token = self.tokens.get(self.pos)?;
        if column.shape.accepts(token) {
            self.pos += 1;
            Some(token.to_string())
        } else {
            None
        }
    }

    fn rest(&self) -> &[&'a str] {
        &self.tokens[self.pos.min(self.tokens.len())..]
    }
}

/// Match one data line against [`COLUMNS`]
pub fn parse_line(line_number: usize, line: &str) -> Result<RegionTableRow, LineRejection> {
    let [id, name, public_ipv4, private_ipv4, public_ipv6, memory, vcpus, disk, region, image, vpc_uuid, status, _tags] =
        &COLUMNS;

    let mut cursor = LineCursor {
        line_number,
        tokens: line.split_whitespace().collect(),
        pos: 0,
    };

    let id_value = cursor.integer(id)?;
    let name_value = cursor.column(name)?.to_string();
    let public_ipv4_value = cursor.ipv4(public_ipv4)?;
    let private_ipv4_value = cursor.ipv4(private_ipv4)?;
    let public_ipv6_value = cursor.optional(public_ipv6);
    let memory_value = cursor.integer(memory)?;
    let vcpus_value = cursor.integer(vcpus)?;
    let disk_value = cursor.integer(disk)?;
    let region_value = cursor.column(region)?.to_string();

    // Image is free text: take the fewest tokens after which a VPC UUID and a
    // status word follow.
    let tail = cursor.rest();
    if tail.len() < 3 {
        return Err(cursor.reject(image, &tail.join(" "), "is followed by too few columns"));
    }
    let split = (1..tail.len() - 1)
        .find(|&k| vpc_uuid.shape.accepts(tail[k]) && status.shape.accepts(tail[k + 1]))
        .ok_or_else(|| cursor.reject(vpc_uuid, &tail.join(" "), "and status could not be found after the image"))?;

    Ok(RegionTableRow {
        id: id_value,
        name: name_value,
        public_ipv4: public_ipv4_value,
        private_ipv4: private_ipv4_value,
        public_ipv6: public_ipv6_value,
        memory: memory_value,
        vcpus: vcpus_value,
        disk: disk_value,
        region: region_value,
        image: tail[..split].join(" "),
        vpc_uuid: tail[split].to_string(),
        status: tail[split + 1].to_string(),
        tags: tail[split + 2..].join(" "),
    })
}

/// Parse a whole listing. Header and blank lines are skipped; lines that do
/// not fit the grammar are logged and collected in `rejected`.
pub fn parse_region_table(content: &str) -> RegionTableParse {
    let mut parse = RegionTableParse::default();

    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() || line.starts_with("ID") {
            continue;
        }

        match parse_line(index + 1, line) {
            Ok(row) => parse.rows.push(row),
            Err(rejection) => {
                log::warn!("Region table line skipped: {}", rejection);
                parse.rejected.push(rejection);
            }
        }
    }

    parse
}

/// Load a region table from disk
pub fn load_region_table(path: &Path) -> Result<RegionTable> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read region table: {}", path.display()))?;

    let parse = parse_region_table(&content);
    let table = RegionTable::from_rows(&parse.rows);

    log::info!(
        "Loaded region table from {}: {} addresses, {} lines skipped",
        path.display(),
        table.len(),
        parse.rejected.len()
    );

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const LISTING: &str = "\
ID           Name           Public IPv4        Private IPv4    Public IPv6    Memory    VCPUs    Disk    Region    Image                       VPC UUID                                Status    Tags    Features                            Volumes
412345678    validator-0    164.90.1.2         10.114.0.2                     4096      2        80      fra1      Ubuntu 22.04 (LTS) x64      5b1c6a3e-0a4f-4b1e-9c1d-2b3f4a5c9f2e    active            droplet_agent,private_networking
412345679    validator-1    159.203.4.5        10.116.0.3                     8192      4        160     nyc3      Ubuntu 22.04 (LTS) x64      7d2e8b4f-1b5a-4c2f-8d2e-3c4a5b6d0a3f    active

not a droplet line
412345680    validator-2    not-an-ip          10.116.0.4                     8192      4        160     nyc3      Ubuntu x64                  7d2e8b4f                                active
";

    #[test]
    fn test_parse_listing() {
        let parse = parse_region_table(LISTING);
        assert_eq!(parse.rows.len(), 2);
        assert_eq!(parse.rejected.len(), 2);

        let row = &parse.rows[0];
        assert_eq!(row.id, 412345678);
        assert_eq!(row.name, "validator-0");
        assert_eq!(row.public_ipv4, "164.90.1.2".parse::<Ipv4Addr>().unwrap());
        assert_eq!(row.public_ipv6, None);
        assert_eq!(row.memory, 4096);
        assert_eq!(row.region, "fra1");
        assert_eq!(row.image, "Ubuntu 22.04 (LTS) x64");
        assert_eq!(row.vpc_uuid, "5b1c6a3e-0a4f-4b1e-9c1d-2b3f4a5c9f2e");
        assert_eq!(row.status, "active");
        assert_eq!(row.tags, "droplet_agent,private_networking");

        assert_eq!(parse.rows[1].tags, "");
    }

    #[test]
    fn test_rejections_name_the_column() {
        let parse = parse_region_table(LISTING);
        assert_eq!(parse.rejected[0].column, "ID");
        assert_eq!(parse.rejected[0].line_number, 5);
        assert_eq!(parse.rejected[1].column, "Public IPv4");
        assert_eq!(parse.rejected[1].value, "not-an-ip");
    }

    #[test]
    fn test_optional_ipv6_column() {
        let line = "1 val 1.2.3.4 10.0.0.1 2a03:b0c0:3:d0::1 2048 1 50 ams3 Debian 12.5 x64 abc-def active tag";
        let row = parse_line(1, line).unwrap();
        assert_eq!(row.public_ipv6.as_deref(), Some("2a03:b0c0:3:d0::1"));
        assert_eq!(row.region, "ams3");
        assert_eq!(row.image, "Debian 12.5 x64");
        assert_eq!(row.vpc_uuid, "abc-def");
        assert_eq!(row.tags, "tag");
    }

    #[test]
    fn test_truncated_line() {
        let err = parse_line(3, "1 val 1.2.3.4 10.0.0.1 2048 1").unwrap_err();
        assert_eq!(err.column, "Disk");
        assert_eq!(err.reason, "is missing");
    }

    #[test]
    fn test_load_region_table() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", LISTING).unwrap();

        let table = load_region_table(file.path()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.region_for("159.203.4.5"), Some("nyc3"));
        assert_eq!(table.region_for("10.116.0.3"), None);
    }
}
