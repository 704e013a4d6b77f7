//! CMIS-QL lookup of an object id by name within a parent folder.
//!
//! This is the only query shape the adapter issues (sibling title checks and
//! title lookups). Stores that do not run a full CMIS-QL engine can use
//! [`NameQuery::parse`] to recognize it.

/// Base type a name query searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryObjectType {
    Document,
    Folder,
}

impl QueryObjectType {
    pub fn as_cmis(&self) -> &'static str {
        match self {
            QueryObjectType::Document => "cmis:document",
            QueryObjectType::Folder => "cmis:folder",
        }
    }
}

/// `SELECT cmis:objectId FROM <type> WHERE cmis:name = '<name>' AND IN_FOLDER('<folder>')`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameQuery {
    pub object_type: QueryObjectType,
    pub name: String,
    pub folder_id: String,
}

const SELECT_PREFIX: &str = "SELECT cmis:objectId FROM ";
const NAME_CLAUSE: &str = " WHERE cmis:name = '";
const FOLDER_CLAUSE: &str = " AND IN_FOLDER('";

impl NameQuery {
    pub fn new(object_type: QueryObjectType, name: &str, folder_id: &str) -> Self {
        Self {
            object_type,
            name: name.to_string(),
            folder_id: folder_id.to_string(),
        }
    }

    /// Render the query as a CMIS-QL statement with escaped literals.
    pub fn to_statement(&self) -> String {
        format!(
            "{}{}{}{}'{}{}')",
            SELECT_PREFIX,
            self.object_type.as_cmis(),
            NAME_CLAUSE,
            escape_literal(&self.name),
            FOLDER_CLAUSE,
            escape_literal(&self.folder_id),
        )
    }

    /// Recognize a statement produced by [`NameQuery::to_statement`].
    pub fn parse(statement: &str) -> Option<Self> {
        let rest = statement.trim().strip_prefix(SELECT_PREFIX)?;

        let (object_type, rest) = if let Some(rest) = rest.strip_prefix("cmis:document") {
            (QueryObjectType::Document, rest)
        } else if let Some(rest) = rest.strip_prefix("cmis:folder") {
            (QueryObjectType::Folder, rest)
        } else {
            return None;
        };

        let rest = rest.strip_prefix(NAME_CLAUSE)?;
        let (name, rest) = read_literal(rest)?;
        let rest = rest.strip_prefix(FOLDER_CLAUSE)?;
        let (folder_id, rest) = read_literal(rest)?;

        if rest != ")" {
            return None;
        }

        Some(Self {
            object_type,
            name,
            folder_id,
        })
    }
}

fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Read an escaped literal up to its closing quote. Returns the value and the
/// remainder after the quote.
fn read_literal(input: &str) -> Option<(String, &str)> {
    let mut value = String::new();
    let mut chars = input.char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                let (_, escaped) = chars.next()?;
                value.push(escaped);
            }
            '\'' => return Some((value, &input[i + 1..])),
            _ => value.push(c),
        }
    }

    None
}
