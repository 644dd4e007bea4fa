//! Flattened device tree walker
//!
//! Containers are FDT blobs. This module reads the header and builds a
//! small borrowed tree of nodes and properties; values stay in the blob.
//! Every offset is bounds-checked and nesting is limited, so a hostile blob
//! yields `MalformedContainer` rather than a panic.

use crate::error::{Result, SplError};
use crate::utils::bytes::{align_up, be32, be64, get_be32};
use alloc::vec::Vec;

const FDT_BEGIN_NODE: u32 = 1;
const FDT_END_NODE: u32 = 2;
const FDT_PROP: u32 = 3;
const FDT_NOP: u32 = 4;
const FDT_END: u32 = 9;

/// Deepest node nesting accepted
pub const FDT_MAX_DEPTH: usize = 16;

/// Oldest structure format understood
const FDT_MIN_VERSION: u32 = 16;

fn malformed(what: &'static str) -> SplError {
    SplError::MalformedContainer(what)
}

/// FDT blob header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdtHeader {
    /// Blob size
    pub totalsize: u32,
    /// Structure block offset
    pub off_dt_struct: u32,
    /// Strings block offset
    pub off_dt_strings: u32,
    /// Memory reservation map offset
    pub off_mem_rsvmap: u32,
    /// Format version
    pub version: u32,
    /// Oldest compatible version
    pub last_comp_version: u32,
    /// Boot CPU id
    pub boot_cpuid_phys: u32,
    /// Strings block size
    pub size_dt_strings: u32,
    /// Structure block size
    pub size_dt_struct: u32,
}

impl FdtHeader {
    /// Header magic
    pub const MAGIC: u32 = 0xD00D_FEED;

    /// Header size
    pub const SIZE: usize = 40;

    /// Decode the header at the start of `buf`
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(SplError::ContainerSizeExceeded {
                declared: Self::SIZE as u64,
                available: buf.len() as u64,
            });
        }
        let magic = be32(buf, 0);
        if magic != Self::MAGIC {
            return Err(SplError::UnrecognizedFormat(magic));
        }

        let header = Self {
            totalsize: be32(buf, 4),
            off_dt_struct: be32(buf, 8),
            off_dt_strings: be32(buf, 12),
            off_mem_rsvmap: be32(buf, 16),
            version: be32(buf, 20),
            last_comp_version: be32(buf, 24),
            boot_cpuid_phys: be32(buf, 28),
            size_dt_strings: be32(buf, 32),
            size_dt_struct: be32(buf, 36),
        };

        if (header.totalsize as usize) < Self::SIZE {
            return Err(malformed("totalsize below header size"));
        }
        if header.version < FDT_MIN_VERSION {
            return Err(malformed("unsupported FDT version"));
        }
        let total = header.totalsize as u64;
        if header.off_dt_struct as u64 + header.size_dt_struct as u64 > total
            || header.off_dt_strings as u64 + header.size_dt_strings as u64 > total
        {
            return Err(malformed("block outside blob"));
        }
        Ok(header)
    }

    /// Where external sub-image data starts
    pub fn data_base(&self) -> u64 {
        align_up(self.totalsize as u64, 4)
    }
}

/// A property and where its value sits in the blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Property<'a> {
    /// Property name
    pub name: &'a str,
    /// Raw value
    pub value: &'a [u8],
    /// Offset of the value from the start of the blob
    pub offset: usize,
}

/// A node with its properties and children
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node<'a> {
    /// Node name including any unit address
    pub name: &'a str,
    /// Properties in blob order
    pub props: Vec<Property<'a>>,
    /// Child nodes in blob order
    pub children: Vec<Node<'a>>,
}

impl<'a> Node<'a> {
    /// Property by name
    pub fn prop(&self, name: &str) -> Option<&Property<'a>> {
        self.props.iter().find(|p| p.name == name)
    }

    /// Child node by name
    pub fn child(&self, name: &str) -> Option<&Node<'a>> {
        self.children.iter().find(|c| c.name == name)
    }

    /// String property, without the trailing NUL
    pub fn prop_str(&self, name: &str) -> Option<&'a str> {
        let value = self.prop(name)?.value;
        let end = value.iter().position(|&b| b == 0).unwrap_or(value.len());
        core::str::from_utf8(&value[..end]).ok()
    }

    /// One 32-bit cell
    pub fn prop_u32(&self, name: &str) -> Option<u32> {
        let value = self.prop(name)?.value;
        if value.len() != 4 {
            return None;
        }
        Some(be32(value, 0))
    }

    /// Address property of one or two cells
    pub fn prop_addr(&self, name: &str) -> Result<Option<u64>> {
        let Some(prop) = self.prop(name) else {
            return Ok(None);
        };
        match prop.value.len() {
            4 => Ok(Some(be32(prop.value, 0) as u64)),
            8 => Ok(Some(be64(prop.value, 0))),
            _ => Err(malformed("bad address cell size")),
        }
    }
}

fn read_name(data: &[u8], at: usize) -> Result<&str> {
    let tail = data.get(at..).ok_or(malformed("name outside block"))?;
    let len = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or(malformed("unterminated name"))?;
    core::str::from_utf8(&tail[..len]).map_err(|_| malformed("name is not UTF-8"))
}

/// Build the node tree of a blob holding at least `header.totalsize` bytes
pub fn parse_tree<'a>(blob: &'a [u8], header: &FdtHeader) -> Result<Node<'a>> {
    let struct_start = header.off_dt_struct as usize;
    let structs = blob
        .get(struct_start..struct_start + header.size_dt_struct as usize)
        .ok_or(malformed("structure block truncated"))?;
    let strings_start = header.off_dt_strings as usize;
    let strings = blob
        .get(strings_start..strings_start + header.size_dt_strings as usize)
        .ok_or(malformed("strings block truncated"))?;

    let mut stack: Vec<Node<'a>> = Vec::new();
    let mut root = None;
    let mut pos = 0usize;

    loop {
        let token = get_be32(structs, pos).ok_or(malformed("structure block truncated"))?;
        pos += 4;

        match token {
            FDT_BEGIN_NODE => {
                let name = read_name(structs, pos)?;
                pos = align_up((pos + name.len() + 1) as u64, 4) as usize;
                if root.is_some() {
                    return Err(malformed("node after root"));
                }
                if stack.len() >= FDT_MAX_DEPTH {
                    return Err(malformed("nesting too deep"));
                }
                stack.push(Node {
                    name,
                    ..Node::default()
                });
            }
            FDT_END_NODE => {
                let node = stack.pop().ok_or(malformed("unbalanced end of node"))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = Some(node),
                }
            }
            FDT_PROP => {
                let len = get_be32(structs, pos).ok_or(malformed("property truncated"))? as usize;
                let nameoff =
                    get_be32(structs, pos + 4).ok_or(malformed("property truncated"))? as usize;
                pos += 8;
                let value = structs
                    .get(pos..pos.checked_add(len).ok_or(malformed("property length"))?)
                    .ok_or(malformed("property value truncated"))?;
                let prop = Property {
                    name: read_name(strings, nameoff)?,
                    value,
                    offset: struct_start + pos,
                };
                pos = align_up((pos + len) as u64, 4) as usize;
                stack
                    .last_mut()
                    .ok_or(malformed("property outside node"))?
                    .props
                    .push(prop);
            }
            FDT_NOP => {}
            FDT_END => break,
            _ => return Err(malformed("bad structure token")),
        }
    }

    if !stack.is_empty() {
        return Err(malformed("unterminated node"));
    }
    root.ok_or(malformed("no root node"))
}
