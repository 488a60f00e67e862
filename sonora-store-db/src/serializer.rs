// SPDX-FileCopyrightText: 2026 Sonora Contributors
// SPDX-License-Identifier: MIT

//! Project document tree and its compact binary encoding.
//!
//! A document is a tree of named elements with ordered string attributes.
//! Encoding interns every element and attribute name into a 16-bit code:
//! the dictionary lists `code, length, name` entries and the body is a
//! stream of start, attribute and end opcodes referring to those codes.
//!
//! Dictionary entry: `u16 code | u16 len | name`
//!
//! Body opcodes:
//! - `0x01 u16 code` start element
//! - `0x02 u16 code | u32 len | value` attribute of the open element
//! - `0x03 u16 code` end element

use std::collections::HashMap;

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use crate::types::{BlockIdSet, DocumentBlob, SampleBlockId};

const OP_START: u8 = 0x01;
const OP_ATTR: u8 = 0x02;
const OP_END: u8 = 0x03;

/// Element holding one sample block reference.
pub(crate) const WAVE_BLOCK: &str = "waveblock";
/// Attribute of [`WAVE_BLOCK`] naming the block.
pub(crate) const BLOCK_ID: &str = "blockid";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("document is empty")]
    Empty,

    #[error("document ends in the middle of a field")]
    Truncated,

    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),

    #[error("name code {0} is not in the dictionary")]
    UnknownName(u16),

    #[error("name code {0} appears twice in the dictionary")]
    DuplicateName(u16),

    #[error("name or value is not valid UTF-8")]
    InvalidUtf8,

    #[error("attribute outside of any element")]
    AttributeOutsideElement,

    #[error("end of element {found:?} while {expected:?} is open")]
    MismatchedEnd { expected: String, found: String },

    #[error("elements left open at end of document")]
    Unbalanced,

    #[error("data after the root element")]
    TrailingData,

    #[error("more than {} distinct names", u16::MAX as usize + 1)]
    TooManyNames,

    #[error("{what} of {len} bytes is too long to encode")]
    TooLong { what: &'static str, len: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentNode {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<DocumentNode>,
}

impl DocumentNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(name, value);
        self
    }

    pub fn with_child(mut self, child: DocumentNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Replace the value of `name`, appending it if absent.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(n, _)| *n == name) {
            Some((_, v)) => *v = value,
            None => self.attributes.push((name, value)),
        }
    }

    /// First direct child named `name`.
    pub fn child(&self, name: &str) -> Option<&DocumentNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Remove and return the first direct child named `name`.
    pub fn remove_child(&mut self, name: &str) -> Option<DocumentNode> {
        let index = self.children.iter().position(|c| c.name == name)?;
        Some(self.children.remove(index))
    }

    /// Ids referenced by `waveblock` elements anywhere in the tree.
    pub fn block_ids(&self) -> BlockIdSet {
        let mut ids = BlockIdSet::new();
        let mut pending = vec![self];
        while let Some(node) = pending.pop() {
            if node.name == WAVE_BLOCK {
                if let Some(id) = node.block_id() {
                    ids.insert(id);
                }
            } else {
                pending.extend(node.children.iter());
            }
        }
        ids
    }

    pub(crate) fn block_id(&self) -> Option<SampleBlockId> {
        self.attribute(BLOCK_ID)?.parse().ok()
    }

    /// Collect every `waveblock` element below this node.
    pub(crate) fn wave_blocks_mut<'a>(&'a mut self, out: &mut Vec<&'a mut DocumentNode>) {
        if self.name == WAVE_BLOCK {
            out.push(self);
        } else {
            for child in &mut self.children {
                child.wave_blocks_mut(out);
            }
        }
    }

    pub fn encode(&self) -> Result<DocumentBlob, DocumentError> {
        let mut encoder = Encoder::default();
        encoder.node(self)?;
        Ok(DocumentBlob::new(
            encoder.dict.to_vec(),
            encoder.body.to_vec(),
        ))
    }

    pub fn decode(blob: &DocumentBlob) -> Result<Self, DocumentError> {
        if blob.is_empty() {
            return Err(DocumentError::Empty);
        }
        let names = read_dictionary(&blob.dict)?;
        let name = |code: u16| {
            names
                .get(&code)
                .cloned()
                .ok_or(DocumentError::UnknownName(code))
        };

        let mut body = blob.doc.as_slice();
        let mut open: Vec<DocumentNode> = Vec::new();
        let mut root = None;
        while body.has_remaining() {
            if root.is_some() {
                return Err(DocumentError::TrailingData);
            }
            match body.get_u8() {
                OP_START => open.push(DocumentNode::new(name(take_u16(&mut body)?)?)),
                OP_ATTR => {
                    let attr = name(take_u16(&mut body)?)?;
                    let len = take_u32(&mut body)? as usize;
                    let value = take_str(&mut body, len)?;
                    open.last_mut()
                        .ok_or(DocumentError::AttributeOutsideElement)?
                        .attributes
                        .push((attr, value));
                }
                OP_END => {
                    let found = name(take_u16(&mut body)?)?;
                    let node = open.pop().ok_or(DocumentError::Unbalanced)?;
                    if node.name != found {
                        return Err(DocumentError::MismatchedEnd {
                            expected: node.name,
                            found,
                        });
                    }
                    match open.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => root = Some(node),
                    }
                }
                op => return Err(DocumentError::UnknownOpcode(op)),
            }
        }

        if !open.is_empty() {
            return Err(DocumentError::Unbalanced);
        }
        root.ok_or(DocumentError::Empty)
    }
}

#[derive(Default)]
struct Encoder {
    codes: HashMap<String, u16>,
    dict: BytesMut,
    body: BytesMut,
}

impl Encoder {
    fn intern(&mut self, name: &str) -> Result<u16, DocumentError> {
        if let Some(code) = self.codes.get(name) {
            return Ok(*code);
        }
        let code = u16::try_from(self.codes.len()).map_err(|_| DocumentError::TooManyNames)?;
        let len = u16::try_from(name.len()).map_err(|_| DocumentError::TooLong {
            what: "name",
            len: name.len(),
        })?;
        self.dict.put_u16_le(code);
        self.dict.put_u16_le(len);
        self.dict.put_slice(name.as_bytes());
        self.codes.insert(name.to_owned(), code);
        Ok(code)
    }

    fn node(&mut self, node: &DocumentNode) -> Result<(), DocumentError> {
        let code = self.intern(&node.name)?;
        self.body.put_u8(OP_START);
        self.body.put_u16_le(code);
        for (name, value) in &node.attributes {
            let attr = self.intern(name)?;
            let len = u32::try_from(value.len()).map_err(|_| DocumentError::TooLong {
                what: "value",
                len: value.len(),
            })?;
            self.body.put_u8(OP_ATTR);
            self.body.put_u16_le(attr);
            self.body.put_u32_le(len);
            self.body.put_slice(value.as_bytes());
        }
        for child in &node.children {
            self.node(child)?;
        }
        self.body.put_u8(OP_END);
        self.body.put_u16_le(code);
        Ok(())
    }
}

fn read_dictionary(mut dict: &[u8]) -> Result<HashMap<u16, String>, DocumentError> {
    let mut names = HashMap::new();
    while dict.has_remaining() {
        let code = take_u16(&mut dict)?;
        let len = take_u16(&mut dict)? as usize;
        let name = take_str(&mut dict, len)?;
        if names.insert(code, name).is_some() {
            return Err(DocumentError::DuplicateName(code));
        }
    }
    Ok(names)
}

fn take_u16(buf: &mut &[u8]) -> Result<u16, DocumentError> {
    if buf.remaining() < 2 {
        return Err(DocumentError::Truncated);
    }
    Ok(buf.get_u16_le())
}

fn take_u32(buf: &mut &[u8]) -> Result<u32, DocumentError> {
    if buf.remaining() < 4 {
        return Err(DocumentError::Truncated);
    }
    Ok(buf.get_u32_le())
}

fn take_str(buf: &mut &[u8], len: usize) -> Result<String, DocumentError> {
    if buf.remaining() < len {
        return Err(DocumentError::Truncated);
    }
    let (head, tail) = buf.split_at(len);
    let text = std::str::from_utf8(head).map_err(|_| DocumentError::InvalidUtf8)?;
    *buf = tail;
    Ok(text.to_owned())
}
