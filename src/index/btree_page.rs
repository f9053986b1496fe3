use bytes::{Buf, BufMut};

use crate::buffer::PageView;
use crate::common::{PageId, RecordId, SlotId, PAGE_SIZE};

const PAGE_TYPE_OFFSET: usize = 0;
const SIZE_OFFSET: usize = 4;
const MAX_SIZE_OFFSET: usize = 8;
const KEY_SIZE_OFFSET: usize = 12;

/// Bytes shared by the leaf and internal page headers
pub const BTREE_PAGE_HEADER_SIZE: usize = 16;

/// Tag stored in the first word of every tree page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPageType {
    Invalid,
    Leaf,
    Internal,
}

impl IndexPageType {
    fn from_u32(value: u32) -> Self {
        match value {
            1 => IndexPageType::Leaf,
            2 => IndexPageType::Internal,
            _ => IndexPageType::Invalid,
        }
    }

    fn as_u32(self) -> u32 {
        match self {
            IndexPageType::Invalid => 0,
            IndexPageType::Leaf => 1,
            IndexPageType::Internal => 2,
        }
    }
}

pub(crate) fn read_u32(data: &[u8], offset: usize) -> u32 {
    (&data[offset..offset + 4]).get_u32_le()
}

pub(crate) fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    (&mut data[offset..offset + 4]).put_u32_le(value);
}

pub(crate) fn read_record_id(data: &[u8], offset: usize) -> RecordId {
    let mut buf = &data[offset..offset + RecordId::ENCODED_LEN];
    let page_id = PageId::new(buf.get_u32_le());
    let slot_id = SlotId::new(buf.get_u16_le());
    RecordId::new(page_id, slot_id)
}

pub(crate) fn write_record_id(data: &mut [u8], offset: usize, rid: RecordId) {
    let mut buf = &mut data[offset..offset + RecordId::ENCODED_LEN];
    buf.put_u32_le(rid.page_id.as_u32());
    buf.put_u16_le(rid.slot_id.as_u16());
}

/// Header fields common to leaf and internal pages.
///
/// Implementors only provide the raw page bytes.
pub trait BTreePageHeader {
    fn bytes(&self) -> &[u8];

    fn page_type(&self) -> IndexPageType {
        IndexPageType::from_u32(read_u32(self.bytes(), PAGE_TYPE_OFFSET))
    }

    fn is_leaf(&self) -> bool {
        self.page_type() == IndexPageType::Leaf
    }

    /// Number of entries. For internal pages this counts child pointers.
    fn size(&self) -> usize {
        read_u32(self.bytes(), SIZE_OFFSET) as usize
    }

    fn max_size(&self) -> usize {
        read_u32(self.bytes(), MAX_SIZE_OFFSET) as usize
    }

    /// Minimum occupancy of a non-root page.
    fn min_size(&self) -> usize {
        self.max_size().div_ceil(2)
    }

    fn key_size(&self) -> usize {
        read_u32(self.bytes(), KEY_SIZE_OFFSET) as usize
    }
}

pub(crate) fn init_header(
    data: &mut [u8],
    page_type: IndexPageType,
    max_size: usize,
    key_size: usize,
) {
    data.fill(0);
    write_u32(data, PAGE_TYPE_OFFSET, page_type.as_u32());
    write_u32(data, SIZE_OFFSET, 0);
    write_u32(data, MAX_SIZE_OFFSET, max_size as u32);
    write_u32(data, KEY_SIZE_OFFSET, key_size as u32);
}

pub(crate) fn set_size(data: &mut [u8], size: usize) {
    write_u32(data, SIZE_OFFSET, size as u32);
}

/// Untyped view used to find out what kind of tree page a buffer holds.
pub struct BTreePage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> BTreePageHeader for BTreePage<B> {
    fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }
}

impl<B: AsRef<[u8]>> PageView<B> for BTreePage<B> {
    fn from_bytes(data: B) -> Self {
        debug_assert_eq!(data.as_ref().len(), PAGE_SIZE);
        Self { data }
    }
}

pub type BTreePageRef<'a> = BTreePage<&'a [u8]>;
