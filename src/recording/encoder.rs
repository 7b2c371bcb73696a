//! H.264 encoder wrapper using openh264

use openh264::encoder::{Encoder, FrameType};
use openh264::formats::YUVBuffer;

use crate::errors::WriterError;

/// H.264 encoder using openh264
pub struct H264Encoder {
    encoder: Encoder,
    width: u32,
    height: u32,
    key_frame_interval: u32,
    frame_count: u64,
    last_frame_was_keyframe: bool,
}

impl H264Encoder {
    /// Create a new H.264 encoder with the specified parameters
    ///
    /// openh264 infers the dimensions from the YUV source at encode time;
    /// the bit rate is only a hint.
    pub fn new(width: u32, height: u32, key_frame_interval: u32) -> Result<Self, WriterError> {
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(WriterError::Open(format!(
                "h264 needs a non-empty even frame size, got {}x{}",
                width, height
            )));
        }
        let encoder = Encoder::new()
            .map_err(|e| WriterError::Open(format!("Failed to create encoder: {}", e)))?;

        Ok(Self {
            encoder,
            width,
            height,
            key_frame_interval,
            frame_count: 0,
            last_frame_was_keyframe: false,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Encode a tightly packed RGBA frame
    ///
    /// Returns the encoded NAL units as a single Annex B buffer.
    pub fn encode_rgba(&mut self, rgba: &[u8]) -> Result<EncodedFrame, WriterError> {
        let expected_size = (self.width * self.height * 4) as usize;
        if rgba.len() != expected_size {
            return Err(WriterError::Append(format!(
                "Invalid frame size: expected {} bytes, got {}",
                expected_size,
                rgba.len()
            )));
        }

        let yuv = rgba_to_yuv420(rgba, self.width, self.height);
        self.encode_yuv(yuv)
    }

    /// Encode a YUV420 planar frame
    pub fn encode_yuv(&mut self, yuv: Vec<u8>) -> Result<EncodedFrame, WriterError> {
        if self.key_frame_interval > 0
            && self.frame_count > 0
            && self.frame_count % self.key_frame_interval as u64 == 0
        {
            self.encoder.force_intra_frame();
        }

        let yuv_buffer = YUVBuffer::from_vec(yuv, self.width as usize, self.height as usize);
        let bitstream = self
            .encoder
            .encode(&yuv_buffer)
            .map_err(|e| WriterError::Append(format!("Encoding failed: {}", e)))?;

        self.frame_count += 1;

        let is_keyframe = matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I);
        self.last_frame_was_keyframe = is_keyframe;

        Ok(EncodedFrame {
            data: bitstream.to_vec(),
            is_keyframe,
        })
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn last_was_keyframe(&self) -> bool {
        self.last_frame_was_keyframe
    }

    /// Force the next frame to be a keyframe
    pub fn force_keyframe(&mut self) {
        self.encoder.force_intra_frame();
    }
}

/// Result of encoding a single frame
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Encoded H.264 data in Annex B format (with start codes)
    pub data: Vec<u8>,
    /// Whether this frame is a keyframe (IDR/I frame)
    pub is_keyframe: bool,
}

/// Convert packed RGBA to YUV420 planar, BT.601 limited range
fn rgba_to_yuv420(rgba: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;

    let y_size = w * h;
    let uv_size = (w / 2) * (h / 2);
    let mut yuv = vec![0u8; y_size + uv_size * 2];

    let (y_plane, uv_planes) = yuv.split_at_mut(y_size);
    let (u_plane, v_plane) = uv_planes.split_at_mut(uv_size);

    for y in 0..h {
        for x in 0..w {
            let idx = (y * w + x) * 4;
            let r = rgba[idx] as i32;
            let g = rgba[idx + 1] as i32;
            let b = rgba[idx + 2] as i32;

            let y_val = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
            y_plane[y * w + x] = y_val.clamp(0, 255) as u8;

            // 2x2 subsampling from the top-left pixel
            if y % 2 == 0 && x % 2 == 0 {
                let uv_idx = (y / 2) * (w / 2) + (x / 2);
                let u_val = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
                let v_val = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
                u_plane[uv_idx] = u_val.clamp(0, 255) as u8;
                v_plane[uv_idx] = v_val.clamp(0, 255) as u8;
            }
        }
    }

    yuv
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgba_to_yuv420_size() {
        let rgba = vec![128u8; 64 * 48 * 4];
        let yuv = rgba_to_yuv420(&rgba, 64, 48);
        assert_eq!(yuv.len(), 64 * 48 * 3 / 2);
    }

    #[test]
    fn test_black_and_white_luma() {
        let mut rgba = vec![0u8; 2 * 2 * 4];
        rgba[4..8].copy_from_slice(&[255, 255, 255, 255]);
        let yuv = rgba_to_yuv420(&rgba, 2, 2);
        assert_eq!(yuv[0], 16);
        assert_eq!(yuv[1], 235);
        // Neutral chroma for a black sample
        assert_eq!(yuv[4], 128);
        assert_eq!(yuv[5], 128);
    }

    #[test]
    fn test_odd_size_rejected() {
        assert!(matches!(H264Encoder::new(641, 480, 30), Err(WriterError::Open(_))));
    }

    #[test]
    fn test_encode_frame() {
        let mut encoder = H264Encoder::new(64, 48, 30).expect("Encoder creation failed");
        let encoded = encoder
            .encode_rgba(&vec![128u8; 64 * 48 * 4])
            .expect("Encoding should succeed");

        assert!(!encoded.data.is_empty());
        assert!(
            encoded.data.starts_with(&[0x00, 0x00, 0x00, 0x01])
                || encoded.data.starts_with(&[0x00, 0x00, 0x01]),
            "Should start with Annex B start code"
        );
        assert!(encoded.is_keyframe, "First frame should be a keyframe");
        assert_eq!(encoder.frame_count(), 1);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let mut encoder = H264Encoder::new(64, 48, 30).unwrap();
        assert!(matches!(encoder.encode_rgba(&[0u8; 10]), Err(WriterError::Append(_))));
    }
}
