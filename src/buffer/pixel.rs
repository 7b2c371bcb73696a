//! Reference-counted pixel buffers with attachment dictionaries

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use serde::{Deserialize, Serialize};

use crate::errors::PoolError;

/// Rows are padded to this many bytes
pub const BYTES_PER_ROW_ALIGNMENT: usize = 64;

/// Memory layout of a pixel buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit B, G, R, A bytes
    Bgra32,
    /// 8-bit R, G, B, A bytes
    Rgba32,
    /// Little-endian 32-bit word, R in bits 0-9, G 10-19, B 20-29, 2-bit alpha on top
    Rgb10A2,
    /// Little-endian 32-bit word, B in bits 0-9, G 10-19, R 20-29, extended range
    Rgb30WideGamut,
    /// Four little-endian 16-bit words B, G, R, A, 10 significant bits each, extended range
    Bgra64Xr,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Bgra64Xr => 8,
            _ => 4,
        }
    }

    /// Whether container writers accept this layout without conversion
    pub fn is_encodable(&self) -> bool {
        matches!(self, PixelFormat::Bgra32 | PixelFormat::Rgb30WideGamut)
    }

    pub fn has_alpha(&self) -> bool {
        !matches!(self, PixelFormat::Rgb30WideGamut)
    }

    pub fn is_wide_gamut(&self) -> bool {
        matches!(self, PixelFormat::Rgb30WideGamut | PixelFormat::Bgra64Xr)
    }

    /// Padded row length for a buffer of `width` pixels
    pub fn bytes_per_row(&self, width: u32) -> usize {
        let tight = width as usize * self.bytes_per_pixel();
        tight.div_ceil(BYTES_PER_ROW_ALIGNMENT) * BYTES_PER_ROW_ALIGNMENT
    }
}

/// Geometry and format shared by every buffer of one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolKey {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl PoolKey {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    pub fn validate(&self) -> Result<(), PoolError> {
        if self.width == 0 || self.height == 0 {
            return Err(PoolError::InvalidGeometry {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }

    pub fn bytes_per_row(&self) -> usize {
        self.format.bytes_per_row(self.width)
    }

    pub fn data_len(&self) -> usize {
        self.bytes_per_row() * self.height as usize
    }
}

/// Well-known attachment keys
pub mod keys {
    pub const COLOR_PRIMARIES: &str = "ColorPrimaries";
    pub const TRANSFER_FUNCTION: &str = "TransferFunction";
    pub const YCBCR_MATRIX: &str = "YCbCrMatrix";
    pub const ICC_PROFILE: &str = "ICCProfile";
    pub const ALPHA_TYPE: &str = "AlphaType";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttachmentValue {
    Text(String),
    Number(f64),
    Data(Vec<u8>),
}

impl AttachmentValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttachmentValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<&str> for AttachmentValue {
    fn from(value: &str) -> Self {
        AttachmentValue::Text(value.to_string())
    }
}

pub type Attachments = BTreeMap<String, AttachmentValue>;

/// Whether an attachment follows the buffer's content into copies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentMode {
    ShouldPropagate,
    ShouldNotPropagate,
}

/// Receives the storage of a pooled buffer once its last clone is dropped
pub(crate) trait Recycle: Send + Sync {
    fn recycle(&self, storage: Vec<u8>);
}

#[derive(Default)]
struct AttachmentSet {
    propagated: Attachments,
    non_propagated: Attachments,
}

struct BufferInner {
    key: PoolKey,
    bytes_per_row: usize,
    data: RwLock<Vec<u8>>,
    attachments: Mutex<AttachmentSet>,
    home: Option<Weak<dyn Recycle>>,
}

impl Drop for BufferInner {
    fn drop(&mut self) {
        let Some(home) = self.home.take() else {
            return;
        };
        let storage = std::mem::take(self.data.get_mut().unwrap_or_else(PoisonError::into_inner));
        if let Some(pool) = home.upgrade() {
            pool.recycle(storage);
        }
    }
}

/// A reference-counted 2D block of pixel memory
///
/// Cloning a `PixelBuffer` shares the same memory. The memory goes back to
/// its pool when the last clone is dropped. Content access goes through
/// [`PixelBuffer::read`] and [`PixelBuffer::write`], so a buffer is never
/// mutated while someone else reads it.
#[derive(Clone)]
pub struct PixelBuffer {
    inner: Arc<BufferInner>,
}

impl PixelBuffer {
    /// Allocate a standalone buffer that does not belong to any pool
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Result<Self, PoolError> {
        let key = PoolKey::new(width, height, format);
        key.validate()?;
        Ok(Self::from_parts(key, vec![0; key.data_len()], None))
    }

    pub(crate) fn from_parts(
        key: PoolKey,
        storage: Vec<u8>,
        home: Option<Weak<dyn Recycle>>,
    ) -> Self {
        debug_assert_eq!(storage.len(), key.data_len());
        Self {
            inner: Arc::new(BufferInner {
                key,
                bytes_per_row: key.bytes_per_row(),
                data: RwLock::new(storage),
                attachments: Mutex::new(AttachmentSet::default()),
                home,
            }),
        }
    }

    pub fn width(&self) -> u32 {
        self.inner.key.width
    }

    pub fn height(&self) -> u32 {
        self.inner.key.height
    }

    pub fn format(&self) -> PixelFormat {
        self.inner.key.format
    }

    pub fn key(&self) -> PoolKey {
        self.inner.key
    }

    pub fn bytes_per_row(&self) -> usize {
        self.inner.bytes_per_row
    }

    pub fn is_pooled(&self) -> bool {
        self.inner.home.is_some()
    }

    /// True when both handles refer to the same memory
    pub fn ptr_eq(&self, other: &PixelBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Lock the buffer for reading
    pub fn read(&self) -> Result<RwLockReadGuard<'_, Vec<u8>>, PoolError> {
        self.inner.data.read().map_err(|_| PoolError::PoisonedLock)
    }

    /// Lock the buffer for writing
    pub fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<u8>>, PoolError> {
        self.inner.data.write().map_err(|_| PoolError::PoisonedLock)
    }

    pub fn attachment(&self, key: &str) -> Option<AttachmentValue> {
        let set = self.lock_attachments();
        set.propagated
            .get(key)
            .or_else(|| set.non_propagated.get(key))
            .cloned()
    }

    pub fn attachments(&self, mode: AttachmentMode) -> Attachments {
        let set = self.lock_attachments();
        match mode {
            AttachmentMode::ShouldPropagate => set.propagated.clone(),
            AttachmentMode::ShouldNotPropagate => set.non_propagated.clone(),
        }
    }

    pub fn set_attachment(
        &self,
        key: impl Into<String>,
        value: AttachmentValue,
        mode: AttachmentMode,
    ) {
        let key = key.into();
        let mut set = self.lock_attachments();
        // a key lives in exactly one of the two dictionaries
        match mode {
            AttachmentMode::ShouldPropagate => {
                set.non_propagated.remove(&key);
                set.propagated.insert(key, value);
            }
            AttachmentMode::ShouldNotPropagate => {
                set.propagated.remove(&key);
                set.non_propagated.insert(key, value);
            }
        }
    }

    pub fn set_attachments(&self, attachments: &Attachments, mode: AttachmentMode) {
        for (key, value) in attachments {
            self.set_attachment(key.clone(), value.clone(), mode);
        }
    }

    pub fn remove_all_attachments(&self) {
        let mut set = self.lock_attachments();
        set.propagated.clear();
        set.non_propagated.clear();
    }

    /// Copy pixels and propagated attachments from `source`
    ///
    /// Both buffers must share the same pool key.
    pub fn copy_from(&self, source: &PixelBuffer) -> Result<(), PoolError> {
        if self.ptr_eq(source) {
            return Ok(());
        }
        if self.key() != source.key() {
            return Err(PoolError::FormatMismatch(format!(
                "cannot copy {:?} into {:?}",
                source.key(),
                self.key()
            )));
        }

        {
            let src = source.read()?;
            let mut dst = self.write()?;
            dst.copy_from_slice(&src);
        }

        let propagated = source.attachments(AttachmentMode::ShouldPropagate);
        self.set_attachments(&propagated, AttachmentMode::ShouldPropagate);
        Ok(())
    }

    fn lock_attachments(&self) -> std::sync::MutexGuard<'_, AttachmentSet> {
        self.inner
            .attachments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("format", &self.format())
            .field("bytes_per_row", &self.bytes_per_row())
            .field("pooled", &self.is_pooled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_are_aligned() {
        assert_eq!(PixelFormat::Bgra32.bytes_per_row(16), 64);
        assert_eq!(PixelFormat::Bgra32.bytes_per_row(17), 128);
        assert_eq!(PixelFormat::Bgra64Xr.bytes_per_row(8), 64);
    }

    #[test]
    fn test_zero_geometry_rejected() {
        let result = PixelBuffer::new(0, 10, PixelFormat::Bgra32);
        assert_eq!(
            result.unwrap_err(),
            PoolError::InvalidGeometry {
                width: 0,
                height: 10
            }
        );
    }

    #[test]
    fn test_clone_shares_memory() {
        let buffer = PixelBuffer::new(4, 4, PixelFormat::Bgra32).unwrap();
        let other = buffer.clone();
        buffer.write().unwrap()[0] = 42;
        assert_eq!(other.read().unwrap()[0], 42);
        assert!(buffer.ptr_eq(&other));
    }

    #[test]
    fn test_attachment_modes_are_exclusive() {
        let buffer = PixelBuffer::new(2, 2, PixelFormat::Bgra32).unwrap();
        buffer.set_attachment(
            keys::ICC_PROFILE,
            "sRGB".into(),
            AttachmentMode::ShouldNotPropagate,
        );
        buffer.set_attachment(
            keys::ICC_PROFILE,
            "Display P3".into(),
            AttachmentMode::ShouldPropagate,
        );

        assert!(buffer
            .attachments(AttachmentMode::ShouldNotPropagate)
            .is_empty());
        assert_eq!(
            buffer.attachment(keys::ICC_PROFILE),
            Some(AttachmentValue::Text("Display P3".to_string()))
        );
    }

    #[test]
    fn test_copy_from_carries_propagated_attachments_only() {
        let source = PixelBuffer::new(3, 2, PixelFormat::Rgba32).unwrap();
        source.write().unwrap().iter_mut().for_each(|b| *b = 7);
        source.set_attachment(keys::COLOR_PRIMARIES, "P3_D65".into(), AttachmentMode::ShouldPropagate);
        source.set_attachment("FrameIndex", AttachmentValue::Number(3.0), AttachmentMode::ShouldNotPropagate);

        let copy = PixelBuffer::new(3, 2, PixelFormat::Rgba32).unwrap();
        copy.copy_from(&source).unwrap();

        assert!(copy.read().unwrap().iter().all(|&b| b == 7));
        assert_eq!(
            copy.attachment(keys::COLOR_PRIMARIES).as_ref().and_then(|v| v.as_text()),
            Some("P3_D65")
        );
        assert!(copy.attachment("FrameIndex").is_none());
    }

    #[test]
    fn test_copy_between_keys_fails() {
        let a = PixelBuffer::new(2, 2, PixelFormat::Bgra32).unwrap();
        let b = PixelBuffer::new(2, 2, PixelFormat::Rgba32).unwrap();
        assert!(matches!(a.copy_from(&b), Err(PoolError::FormatMismatch(_))));
    }
}
