//! VRAM object cache and aliasing-coherence engine for the VaporGPU device model.
//!
//! The guest sees a flat, byte-addressed video memory space and describes GPU
//! resources (vertex/index buffers, textures, command buffers, descriptor
//! tables, kernels) as byte ranges inside it. This crate maps those ranges to
//! live, typed, host-backed objects and keeps everything coherent when ranges
//! alias each other:
//!
//! - [`Store`]: the canonical flat byte array (ground truth for every byte).
//! - [`BucketIndex`]: fixed-granularity bucket table for range-overlap queries.
//! - [`VramCache`]: object registry, overlap tracker and lifecycle manager
//!   (`reference` / `lookup_exact` / `settle_all`).
//! - Range-scoped coherent reads/writes that split a request into per-object
//!   portions ranked by a recency preference ([`RecencyPreference`]).
//! - [`backend::ResourceBackend`]: the seam to the host graphics API; this
//!   crate never talks to a real GPU itself.

mod cache;
mod coherence;
mod error;
mod index;
mod object;
mod store;
mod texture;

pub mod backend;

pub use cache::{
    uniform_len_valid, LenMatch, LenSpec, VramCache, MAX_UNIFORM_LEN, OBJECT_ALIGN, VRAM_CAPACITY,
};
pub use coherence::{Portion, RecencyPreference};
pub use error::{Result, VramError};
pub use index::{BucketIndex, BUCKET_SIZE};
pub use object::{decode_header, Header, Object, ObjectId, ObjectKind, DESCRIPTOR_STRIDE};
pub use store::Store;
pub use texture::{TexFormat, TextureHeader, MAX_1D_DIM, MAX_2D_DIM, MAX_3D_DIM};
