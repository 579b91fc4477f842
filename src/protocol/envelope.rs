use std::io::Write;

use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use super::{Event, Transaction};

/// Raised if a envelope cannot be parsed from a given input.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Unexpected end of file
    #[error("unexpected end of file")]
    UnexpectedEof,
    /// Missing envelope header
    #[error("missing envelope header")]
    MissingHeader,
    /// Missing newline after header or payload
    #[error("missing newline after header or payload")]
    MissingNewline,
    /// Invalid envelope header
    #[error("invalid envelope header")]
    InvalidHeader(#[source] serde_json::Error),
    /// Invalid item header
    #[error("invalid item header")]
    InvalidItemHeader(#[source] serde_json::Error),
    /// Invalid item payload
    #[error("invalid item payload")]
    InvalidItemPayload(#[source] serde_json::Error),
}

#[derive(Deserialize)]
struct EnvelopeHeader {
    event_id: Option<Uuid>,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
enum EnvelopeItemType {
    #[serde(rename = "event")]
    Event,
    #[serde(rename = "transaction")]
    Transaction,
}

#[derive(Clone, Debug, Deserialize)]
struct EnvelopeItemHeader {
    r#type: EnvelopeItemType,
    length: Option<usize>,
}

/// An item carried by an [`Envelope`].
#[derive(Clone, Debug, PartialEq)]
#[allow(clippy::large_enum_variant)]
pub enum EnvelopeItem {
    /// A captured error or message.
    Event(Event),
    /// A finished performance transaction.
    Transaction(Transaction),
}

impl EnvelopeItem {
    fn item_type(&self) -> &'static str {
        match self {
            EnvelopeItem::Event(_) => "event",
            EnvelopeItem::Transaction(_) => "transaction",
        }
    }
}

impl From<Event> for EnvelopeItem {
    fn from(event: Event) -> Self {
        EnvelopeItem::Event(event)
    }
}

impl From<Transaction> for EnvelopeItem {
    fn from(transaction: Transaction) -> Self {
        EnvelopeItem::Transaction(transaction)
    }
}

/// The newline-delimited container events and transactions are submitted in.
///
/// The first line is a JSON header carrying the event id. Every item follows
/// as a header line `{"type":...,"length":N}` and its JSON payload.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct Envelope {
    event_id: Option<Uuid>,
    items: Vec<EnvelopeItem>,
}

impl Envelope {
    /// Creates a new empty Envelope.
    pub fn new() -> Envelope {
        Default::default()
    }

    /// Add a new Envelope Item.
    pub fn add_item<I>(&mut self, item: I)
    where
        I: Into<EnvelopeItem>,
    {
        let item = item.into();
        if self.event_id.is_none() {
            self.event_id = Some(match item {
                EnvelopeItem::Event(ref event) => event.event_id,
                EnvelopeItem::Transaction(ref transaction) => transaction.event_id,
            });
        }
        self.items.push(item);
    }

    /// Iterates over all the items.
    pub fn items(&self) -> std::slice::Iter<'_, EnvelopeItem> {
        self.items.iter()
    }

    /// Returns the Envelopes Uuid, if any.
    pub fn uuid(&self) -> Option<&Uuid> {
        self.event_id.as_ref()
    }

    /// Returns the [`Event`] contained in this Envelope, if any.
    pub fn event(&self) -> Option<&Event> {
        self.items.iter().find_map(|item| match item {
            EnvelopeItem::Event(event) => Some(event),
            _ => None,
        })
    }

    /// Returns the [`Transaction`] contained in this Envelope, if any.
    pub fn transaction(&self) -> Option<&Transaction> {
        self.items.iter().find_map(|item| match item {
            EnvelopeItem::Transaction(transaction) => Some(transaction),
            _ => None,
        })
    }

    /// Serialize the Envelope into the given [`Write`].
    pub fn to_writer<W>(&self, mut writer: W) -> std::io::Result<()>
    where
        W: Write,
    {
        match self.uuid() {
            Some(uuid) => writeln!(writer, r#"{{"event_id":"{uuid}"}}"#)?,
            _ => writeln!(writer, "{{}}")?,
        }

        let mut item_buf = Vec::new();
        for item in &self.items {
            // payloads go through a buffer first since the header carries their length
            match item {
                EnvelopeItem::Event(event) => serde_json::to_writer(&mut item_buf, event)?,
                EnvelopeItem::Transaction(transaction) => {
                    serde_json::to_writer(&mut item_buf, transaction)?
                }
            }
            writeln!(
                writer,
                r#"{{"type":"{}","length":{}}}"#,
                item.item_type(),
                item_buf.len()
            )?;
            writer.write_all(&item_buf)?;
            writeln!(writer)?;
            item_buf.clear();
        }

        Ok(())
    }

    /// Serializes the Envelope into a byte buffer.
    pub fn to_vec(&self) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.to_writer(&mut buf)?;
        Ok(buf)
    }

    /// Creates a new Envelope from slice.
    pub fn from_slice(slice: &[u8]) -> Result<Envelope, EnvelopeError> {
        let (header, mut offset) = Self::parse_header(slice)?;

        let mut envelope = Envelope {
            event_id: header.event_id,
            ..Default::default()
        };

        while offset < slice.len() {
            let bytes = slice.get(offset..).ok_or(EnvelopeError::UnexpectedEof)?;
            let (item, item_size) = Self::parse_item(bytes)?;
            offset += item_size;
            envelope.add_item(item);
        }

        Ok(envelope)
    }

    fn parse_header(slice: &[u8]) -> Result<(EnvelopeHeader, usize), EnvelopeError> {
        let mut stream = serde_json::Deserializer::from_slice(slice).into_iter();

        let header: EnvelopeHeader = match stream.next() {
            None => return Err(EnvelopeError::MissingHeader),
            Some(Err(error)) => return Err(EnvelopeError::InvalidHeader(error)),
            Some(Ok(header)) => header,
        };

        // Each header is terminated by a UNIX newline.
        Self::require_termination(slice, stream.byte_offset())?;

        Ok((header, stream.byte_offset() + 1))
    }

    fn parse_item(slice: &[u8]) -> Result<(EnvelopeItem, usize), EnvelopeError> {
        let mut stream = serde_json::Deserializer::from_slice(slice).into_iter();

        let header: EnvelopeItemHeader = match stream.next() {
            None => return Err(EnvelopeError::UnexpectedEof),
            Some(Err(error)) => return Err(EnvelopeError::InvalidItemHeader(error)),
            Some(Ok(header)) => header,
        };

        let header_end = stream.byte_offset();
        Self::require_termination(slice, header_end)?;

        // The last header does not require a trailing newline.
        let payload_start = std::cmp::min(header_end + 1, slice.len());
        let payload_end = match header.length {
            Some(len) => {
                let payload_end = payload_start
                    .checked_add(len)
                    .ok_or(EnvelopeError::UnexpectedEof)?;
                if slice.len() < payload_end {
                    return Err(EnvelopeError::UnexpectedEof);
                }
                Self::require_termination(slice, payload_end)?;
                payload_end
            }
            None => slice[payload_start..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|relative_end| payload_start + relative_end)
                .unwrap_or(slice.len()),
        };

        let payload = &slice[payload_start..payload_end];

        let item = match header.r#type {
            EnvelopeItemType::Event => serde_json::from_slice(payload).map(EnvelopeItem::Event),
            EnvelopeItemType::Transaction => {
                serde_json::from_slice(payload).map(EnvelopeItem::Transaction)
            }
        }
        .map_err(EnvelopeError::InvalidItemPayload)?;

        Ok((item, payload_end + 1))
    }

    fn require_termination(slice: &[u8], offset: usize) -> Result<(), EnvelopeError> {
        match slice.get(offset) {
            Some(&b'\n') | None => Ok(()),
            Some(_) => Err(EnvelopeError::MissingNewline),
        }
    }
}

impl<T> From<T> for Envelope
where
    T: Into<EnvelopeItem>,
{
    fn from(item: T) -> Self {
        let mut envelope = Self::default();
        envelope.add_item(item.into());
        envelope
    }
}
