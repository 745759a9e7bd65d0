//! Typed object views over the backing store.
//!
//! An [`Object`] is the cache's unit of bookkeeping: one byte range, one kind,
//! at most one host resource handle. Kind-specific header decoding lives here
//! so the lifecycle manager can stay generic; adding a resource kind means
//! adding a variant plus one decode arm, not touching every call site.

use crate::backend::{HandleId, ResourceBackend};
use crate::store::Store;
use crate::texture::TextureHeader;

/// Registry key for a live object. Never reused within a cache's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectId(pub(crate) u64);

/// Closed set of resource kinds the guest can describe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    CommandBuffer,
    VertexBuffer,
    IndexBuffer,
    Texture,
    UniformBuffer,
    DescriptorTable,
    Kernel,
}

impl ObjectKind {
    /// Length of the kind's in-VRAM header, zero for kinds that are sized
    /// explicitly by the caller.
    pub fn header_len(self) -> u64 {
        match self {
            ObjectKind::CommandBuffer | ObjectKind::Kernel => 4,
            ObjectKind::Texture => 14,
            ObjectKind::DescriptorTable => 2,
            ObjectKind::VertexBuffer | ObjectKind::IndexBuffer | ObjectKind::UniformBuffer => 0,
        }
    }

    /// Whether the kind's total length can be derived from its header.
    pub fn self_describing(self) -> bool {
        self.header_len() != 0
    }

    /// Whether objects of this kind own a host graphics resource. The other
    /// kinds are consumed straight out of the backing store.
    pub fn has_host_resource(self) -> bool {
        matches!(
            self,
            ObjectKind::VertexBuffer
                | ObjectKind::IndexBuffer
                | ObjectKind::Texture
                | ObjectKind::UniformBuffer
        )
    }
}

/// Decoded header metadata, parsed once at object creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Header {
    /// No header (explicitly sized kinds, or a self-describing kind referenced
    /// with an explicit length).
    None,
    CommandBuffer { cmd_bytes: u32 },
    Kernel { code_bytes: u32 },
    DescriptorTable { descriptor_count: u16 },
    Texture(TextureHeader),
}

/// Byte stride of one descriptor-table entry (metadata word + address).
pub const DESCRIPTOR_STRIDE: u64 = 16;

/// Decode a kind's header from its raw bytes, returning the decoded metadata
/// and the object's total length (header plus payload).
///
/// Returns `None` for headers that fail the kind's validity checks, including
/// a derived length of zero. Panics if `kind` has no header definition; that
/// is a caller bug, not guest input.
pub fn decode_header(kind: ObjectKind, raw: &[u8]) -> Option<(Header, u64)> {
    assert_eq!(
        raw.len() as u64,
        kind.header_len(),
        "decode_header needs exactly the header bytes"
    );

    match kind {
        ObjectKind::CommandBuffer => {
            let cmd_bytes = u32::from_le_bytes(raw.try_into().unwrap());
            if cmd_bytes == 0 {
                return None;
            }
            Some((
                Header::CommandBuffer { cmd_bytes },
                kind.header_len() + u64::from(cmd_bytes),
            ))
        }
        ObjectKind::Kernel => {
            let code_bytes = u32::from_le_bytes(raw.try_into().unwrap());
            if code_bytes == 0 {
                return None;
            }
            Some((
                Header::Kernel { code_bytes },
                kind.header_len() + u64::from(code_bytes),
            ))
        }
        ObjectKind::DescriptorTable => {
            let descriptor_count = u16::from_le_bytes(raw.try_into().unwrap());
            if descriptor_count == 0 {
                return None;
            }
            Some((
                Header::DescriptorTable { descriptor_count },
                kind.header_len() + u64::from(descriptor_count) * DESCRIPTOR_STRIDE,
            ))
        }
        ObjectKind::Texture => {
            let hdr = TextureHeader::decode(raw)?;
            Some((Header::Texture(hdr), kind.header_len() + hdr.data_size()))
        }
        ObjectKind::VertexBuffer | ObjectKind::IndexBuffer | ObjectKind::UniformBuffer => {
            panic!("{kind:?} has no self-described header")
        }
    }
}

/// A live, typed view over `[addr, addr + len)` of the backing store.
#[derive(Debug)]
pub struct Object {
    pub id: ObjectId,
    pub addr: u64,
    pub len: u64,
    pub kind: ObjectKind,
    pub header: Header,
    /// Host resource, exclusively owned. `None` for kinds with no host
    /// resource or when the backend declined to create one.
    pub handle: Option<HandleId>,
    /// Tracked by the overlap set because another live object's range
    /// intersects this one.
    pub in_overlaps: bool,
    /// A write touched the header region; the decoded metadata may be stale
    /// and the object must be rebuilt before reuse.
    pub needs_resync: bool,
    /// Logical timestamp of the last (re-)reference; globally unique and
    /// strictly increasing, starting at 1.
    pub recency: u64,
}

impl Object {
    /// Exclusive end of the object's range.
    pub fn end(&self) -> u64 {
        self.addr + self.len
    }

    pub fn header_len(&self) -> u64 {
        self.kind.header_len()
    }

    /// Closed-interval intersection test against `[addr, addr + len)`.
    pub fn intersects(&self, addr: u64, len: u64) -> bool {
        debug_assert!(len > 0);
        self.addr + self.len - 1 >= addr && addr + len - 1 >= self.addr
    }

    /// Read `dst.len()` bytes of this object's content starting at absolute
    /// address `src`.
    ///
    /// Header bytes always come from the backing store; payload bytes come
    /// from the host resource when one exists, otherwise from the backing
    /// store as well. The range must lie within the object.
    pub(crate) fn read_bytes(
        &self,
        store: &Store,
        backend: &dyn ResourceBackend,
        dst: &mut [u8],
        src: u64,
    ) {
        let n = dst.len() as u64;
        assert!(
            src >= self.addr && src + n <= self.end(),
            "object read [{:#x}, {:#x}) outside object [{:#x}, {:#x})",
            src,
            src + n,
            self.addr,
            self.end()
        );

        let header_end = self.addr + self.header_len();
        let head_len = header_end.saturating_sub(src).min(n) as usize;
        let (head, tail) = dst.split_at_mut(head_len);
        if !head.is_empty() {
            store
                .read_into(src, head)
                .expect("object range lies within the store");
        }
        if tail.is_empty() {
            return;
        }

        let payload_addr = src + head_len as u64;
        match self.handle {
            Some(handle) => backend.read(handle, payload_addr - header_end, tail),
            None => store
                .read_into(payload_addr, tail)
                .expect("object range lies within the store"),
        }
    }

    /// Write `src` into this object's content starting at absolute address
    /// `dst`.
    ///
    /// Header bytes are not written here: the caller mirrors every write into
    /// the backing store, which is where header bytes live. A header touch
    /// only marks the decoded metadata stale.
    pub(crate) fn write_bytes(&mut self, backend: &mut dyn ResourceBackend, dst: u64, src: &[u8]) {
        let n = src.len() as u64;
        assert!(
            dst >= self.addr && dst + n <= self.end(),
            "object write [{:#x}, {:#x}) outside object [{:#x}, {:#x})",
            dst,
            dst + n,
            self.addr,
            self.end()
        );

        let header_end = self.addr + self.header_len();
        let mut dst = dst;
        let mut src = src;
        if dst < header_end {
            self.needs_resync = true;

            let count = (header_end - dst).min(n) as usize;
            dst += count as u64;
            src = &src[count..];
            if src.is_empty() {
                return;
            }
        }

        if let Some(handle) = self.handle {
            backend.write(handle, dst - header_end, src);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lengths_match_kind_table() {
        assert_eq!(ObjectKind::CommandBuffer.header_len(), 4);
        assert_eq!(ObjectKind::Texture.header_len(), 14);
        assert_eq!(ObjectKind::DescriptorTable.header_len(), 2);
        assert_eq!(ObjectKind::Kernel.header_len(), 4);
        assert_eq!(ObjectKind::VertexBuffer.header_len(), 0);
        assert!(!ObjectKind::UniformBuffer.self_describing());
        assert!(ObjectKind::Texture.has_host_resource());
        assert!(!ObjectKind::Kernel.has_host_resource());
    }

    #[test]
    fn decodes_command_buffer_header() {
        let (hdr, total) = decode_header(ObjectKind::CommandBuffer, &32u32.to_le_bytes()).unwrap();
        assert_eq!(hdr, Header::CommandBuffer { cmd_bytes: 32 });
        assert_eq!(total, 36);

        assert!(decode_header(ObjectKind::CommandBuffer, &0u32.to_le_bytes()).is_none());
    }

    #[test]
    fn decodes_descriptor_table_header() {
        let (hdr, total) = decode_header(ObjectKind::DescriptorTable, &3u16.to_le_bytes()).unwrap();
        assert_eq!(
            hdr,
            Header::DescriptorTable {
                descriptor_count: 3
            }
        );
        assert_eq!(total, 2 + 3 * DESCRIPTOR_STRIDE);
    }

    #[test]
    #[should_panic(expected = "no self-described header")]
    fn auto_length_on_plain_buffer_is_a_caller_bug() {
        let _ = decode_header(ObjectKind::VertexBuffer, &[]);
    }

    #[test]
    fn intersects_uses_closed_intervals() {
        let obj = Object {
            id: ObjectId(1),
            addr: 256,
            len: 16,
            kind: ObjectKind::VertexBuffer,
            header: Header::None,
            handle: None,
            in_overlaps: false,
            needs_resync: false,
            recency: 1,
        };

        assert!(obj.intersects(271, 1));
        assert!(obj.intersects(0, 257));
        assert!(!obj.intersects(272, 8));
        assert!(!obj.intersects(0, 256));
    }
}
