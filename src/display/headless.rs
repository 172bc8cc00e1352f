//! CPU-resident texture store for running without a GPU.

use std::collections::BTreeMap;

use thiserror::Error;

use super::backend::{SamplerPolicy, TextureBackend, TextureHandle};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryBackendError {
    #[error("unknown texture {0}")]
    UnknownHandle(TextureHandle),

    #[error("upload of {actual} bytes does not fill a {width}x{height} RGB texture")]
    SizeMismatch {
        width: u32,
        height: u32,
        actual: usize,
    },
}

#[derive(Debug, Clone)]
pub struct MemoryTexture {
    pub label: String,
    pub sampler: SamplerPolicy,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub uploads: u64,
    /// How many times the storage had to change size
    pub resizes: u64,
}

impl MemoryTexture {
    /// FNV-1a over the texel bytes and dimensions
    pub fn checksum(&self) -> u64 {
        let mut hash: u64 = 0xcbf29ce484222325;
        let dims = self.width.to_le_bytes().into_iter().chain(self.height.to_le_bytes());
        for byte in dims.chain(self.data.iter().copied()) {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
        hash
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    next_id: u64,
    textures: BTreeMap<TextureHandle, MemoryTexture>,
    released: Vec<TextureHandle>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texture(&self, handle: TextureHandle) -> Option<&MemoryTexture> {
        self.textures.get(&handle)
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn released(&self) -> &[TextureHandle] {
        &self.released
    }
}

impl TextureBackend for MemoryBackend {
    type Error = MemoryBackendError;

    fn allocate(
        &mut self,
        label: &str,
        sampler: SamplerPolicy,
    ) -> Result<TextureHandle, Self::Error> {
        self.next_id += 1;
        let handle = TextureHandle::from_raw(self.next_id);
        self.textures.insert(
            handle,
            MemoryTexture {
                label: label.to_owned(),
                sampler,
                width: 0,
                height: 0,
                data: Vec::new(),
                uploads: 0,
                resizes: 0,
            },
        );
        Ok(handle)
    }

    fn upload(
        &mut self,
        handle: TextureHandle,
        width: u32,
        height: u32,
        rgb: &[u8],
    ) -> Result<(), Self::Error> {
        let texture = self
            .textures
            .get_mut(&handle)
            .ok_or(MemoryBackendError::UnknownHandle(handle))?;

        if rgb.len() != width as usize * height as usize * 3 {
            return Err(MemoryBackendError::SizeMismatch {
                width,
                height,
                actual: rgb.len(),
            });
        }

        if (texture.width, texture.height) != (width, height) {
            texture.width = width;
            texture.height = height;
            texture.resizes += 1;
        }
        texture.data.clear();
        texture.data.extend_from_slice(rgb);
        texture.uploads += 1;
        Ok(())
    }

    fn release(&mut self, handle: TextureHandle) {
        if self.textures.remove(&handle).is_some() {
            self.released.push(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_unique() {
        let mut backend = MemoryBackend::new();
        let a = backend.allocate("a", SamplerPolicy::FRAME).unwrap();
        let b = backend.allocate("b", SamplerPolicy::FRAME).unwrap();
        assert_ne!(a, b);
        assert_eq!(backend.live_textures(), 2);
    }

    #[test]
    fn upload_replaces_content_and_tracks_resizes() {
        let mut backend = MemoryBackend::new();
        let h = backend.allocate("t", SamplerPolicy::FRAME).unwrap();

        backend.upload(h, 1, 1, &[1, 2, 3]).unwrap();
        backend.upload(h, 1, 1, &[4, 5, 6]).unwrap();
        backend.upload(h, 2, 1, &[0; 6]).unwrap();

        let tex = backend.texture(h).unwrap();
        assert_eq!((tex.width, tex.height), (2, 1));
        assert_eq!(tex.uploads, 3);
        assert_eq!(tex.resizes, 2);
    }

    #[test]
    fn checksum_changes_with_content() {
        let mut backend = MemoryBackend::new();
        let h = backend.allocate("t", SamplerPolicy::FRAME).unwrap();
        backend.upload(h, 1, 1, &[1, 2, 3]).unwrap();
        let first = backend.texture(h).unwrap().checksum();
        backend.upload(h, 1, 1, &[1, 2, 4]).unwrap();
        assert_ne!(first, backend.texture(h).unwrap().checksum());
    }

    #[test]
    fn upload_to_released_handle_fails() {
        let mut backend = MemoryBackend::new();
        let h = backend.allocate("t", SamplerPolicy::FRAME).unwrap();
        backend.release(h);
        backend.release(h);
        assert_eq!(backend.released(), &[h]);
        assert_eq!(
            backend.upload(h, 1, 1, &[0; 3]),
            Err(MemoryBackendError::UnknownHandle(h))
        );
    }
}
