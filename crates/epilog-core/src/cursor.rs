use uuid::Uuid;

use crate::error::{Error, Result};

/// Keyset pagination token: the (sort key, tie-break id) of the last row
/// of a returned page.
///
/// Encoded as hex so it is opaque and URL-safe. Because it names a row
/// rather than an offset, pages stay correct under concurrent inserts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub started_at: String,
    pub id: Uuid,
}

impl PageCursor {
    pub fn new(started_at: String, id: Uuid) -> Self {
        Self { started_at, id }
    }

    pub fn encode(&self) -> String {
        hex::encode(format!("{}|{}", self.started_at, self.id))
    }

    pub fn decode(token: &str) -> Result<Self> {
        let bytes = hex::decode(token)
            .map_err(|_| Error::Validation(format!("malformed cursor: {token}")))?;
        let raw = String::from_utf8(bytes)
            .map_err(|_| Error::Validation(format!("malformed cursor: {token}")))?;
        let (started_at, id_str) = raw
            .rsplit_once('|')
            .ok_or_else(|| Error::Validation(format!("malformed cursor: {token}")))?;
        let id = Uuid::parse_str(id_str)
            .map_err(|_| Error::Validation(format!("malformed cursor: {token}")))?;
        Ok(Self {
            started_at: started_at.to_string(),
            id,
        })
    }
}
