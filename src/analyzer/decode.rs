use super::{BitFormat, SampleFrame, StreamFormat};

/// Decode one raw analyzer chunk into normalized band amplitudes.
///
/// Samples are unsigned integers in host byte order, exactly as the analyzer
/// writes them. Returns `None` when `data` holds less than a full frame: for
/// the pipe reader that is end-of-stream, not a malformed frame. Bytes past
/// the first frame are ignored.
pub fn decode_frame(data: &[u8], format: StreamFormat) -> Option<SampleFrame> {
    let chunk = format.chunk_size();
    if data.len() < chunk {
        return None;
    }
    let data = &data[..chunk];
    let norm = format.bit_format.max_value();

    let values: Vec<f32> = match format.bit_format {
        BitFormat::Bit8 => data.iter().map(|&b| b as f32 / norm).collect(),
        BitFormat::Bit16 => data
            .chunks_exact(2)
            .map(|pair| bytemuck::pod_read_unaligned::<u16>(pair) as f32 / norm)
            .collect(),
    };

    Some(SampleFrame::new(values))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode16(values: &[u16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_ne_bytes()).collect()
    }

    #[test]
    fn full_scale_16bit_is_one() {
        let format = StreamFormat::new(20, BitFormat::Bit16);
        let frame = decode_frame(&[0xFF; 40], format).unwrap();
        assert_eq!(frame.len(), 20);
        assert!(frame.values().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn decodes_8bit_samples() {
        let format = StreamFormat::new(4, BitFormat::Bit8);
        let frame = decode_frame(&[0, 51, 255, 102], format).unwrap();
        assert_eq!(frame.values(), &[0.0, 0.2, 1.0, 0.4]);
    }

    #[test]
    fn decodes_16bit_in_host_order() {
        let format = StreamFormat::new(3, BitFormat::Bit16);
        let frame = decode_frame(&encode16(&[0, 13107, 65535]), format).unwrap();
        assert_eq!(frame.values(), &[0.0, 0.2, 1.0]);
    }

    #[test]
    fn every_value_is_normalized() {
        for format in [BitFormat::Bit8, BitFormat::Bit16] {
            let stream = StreamFormat::new(64, format);
            let data: Vec<u8> = (0..stream.chunk_size()).map(|i| (i * 37 % 256) as u8).collect();
            let frame = decode_frame(&data, stream).unwrap();
            assert_eq!(frame.len(), 64);
            assert!(frame.values().iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn short_buffer_is_end_of_stream() {
        let format = StreamFormat::new(10, BitFormat::Bit16);
        assert!(decode_frame(&[0u8; 19], format).is_none());
        assert!(decode_frame(&[], format).is_none());
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let format = StreamFormat::new(2, BitFormat::Bit8);
        let frame = decode_frame(&[255, 0, 7, 7], format).unwrap();
        assert_eq!(frame.values(), &[1.0, 0.0]);
    }
}
