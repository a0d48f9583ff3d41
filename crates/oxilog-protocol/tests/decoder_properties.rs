//! 解码器属性测试
//!
//! 使用 proptest 验证重同步、分块输入与状态字无损。

use oxilog_protocol::{
    FrameCodec, MAIN_FRAME_LEN, MAIN_START_MARKER, MainCodec, MainDecoder, MainSample,
    SUB_FRAME_LEN, SUB_START_MARKER, StatusSet, SubCodec, SubDecoder,
};
use proptest::prelude::*;

fn main_frame() -> impl Strategy<Value = (u8, u16, u8, u16)> {
    (0u8..=100, 0u16..=350, any::<u8>(), any::<u16>())
}

/// 坏帧内部（偏移 1..帧长）出现完整起始标记的位置
fn false_markers(bytes: &[u8], marker: &[u8], frame_len: usize) -> Vec<usize> {
    (1..frame_len)
        .filter(|&k| bytes[k..].starts_with(marker))
        .collect()
}

/// 伪起始标记处的字节恰好构成一个有效帧
fn false_frame_valid<C: FrameCodec>(bytes: &[u8], offsets: &[usize]) -> bool {
    offsets
        .iter()
        .any(|&k| C::parse(&bytes[k..k + C::FRAME_LEN], 0).is_ok())
}

proptest! {
    /// 有效 Main 帧解码后再编码，已定义状态位保持不变
    #[test]
    fn status_bits_roundtrip((spo2, hr, pa, word) in main_frame()) {
        let frame = MainCodec::encode_raw(spo2, hr, pa, word);
        let mut decoder = MainDecoder::new();
        let samples: Vec<MainSample> = decoder.feed(&frame, 0).collect();

        prop_assert_eq!(samples.len(), 1);
        let reencoded = MainCodec::encode(&samples[0]);
        prop_assert_eq!(&reencoded[6..8], &(word & StatusSet::DEFINED_MASK).to_be_bytes()[..]);
        prop_assert_eq!(samples[0].status.to_word(), word & StatusSet::DEFINED_MASK);
    }

    /// 单个坏帧之后，解码器最多丢弃一帧长度的字节即恢复对齐
    #[test]
    fn main_resync_after_corrupt_frame(
        (spo2, hr, pa, word) in main_frame(),
        next in main_frame(),
        delta in 1u8..=255,
    ) {
        let mut bad = MainCodec::encode_raw(spo2, hr, pa, word);
        bad[MAIN_FRAME_LEN - 1] = bad[MAIN_FRAME_LEN - 1].wrapping_add(delta);

        let good = MainCodec::encode_raw(next.0, next.1, next.2, next.3);
        let mut bytes = bad.to_vec();
        bytes.extend_from_slice(&good);

        // 伪起始标记只会多产生坏帧；恰好校验通过的伪帧不在此属性范围内
        let markers = false_markers(&bytes, &MAIN_START_MARKER, MAIN_FRAME_LEN);
        prop_assume!(!false_frame_valid::<MainCodec>(&bytes, &markers));

        let mut decoder = MainDecoder::new();
        let samples: Vec<MainSample> = decoder.feed(&bytes, 0).collect();

        prop_assert_eq!(samples.len(), 1);
        prop_assert_eq!(samples[0].spo2, next.0);
        prop_assert_eq!(samples[0].heart_rate, next.1);
        prop_assert_eq!(decoder.corrupt_frames(), 1 + markers.len() as u64);
        prop_assert_eq!(decoder.stats().discarded_bytes, MAIN_FRAME_LEN as u64);
    }

    /// Sub 通道同样在一帧长度内恢复
    #[test]
    fn sub_resync_after_corrupt_frame(
        o2 in any::<i16>(),
        co2 in any::<i16>(),
        next in (any::<i16>(), any::<i16>()),
        delta in 1u8..=255,
    ) {
        let mut bad = SubCodec::encode(o2 as i32, co2 as i32);
        bad[SUB_FRAME_LEN - 1] = bad[SUB_FRAME_LEN - 1].wrapping_add(delta);

        let mut bytes = bad.to_vec();
        bytes.extend_from_slice(&SubCodec::encode(next.0 as i32, next.1 as i32));

        let markers = false_markers(&bytes, &SUB_START_MARKER, SUB_FRAME_LEN);
        prop_assume!(!false_frame_valid::<SubCodec>(&bytes, &markers));

        let mut decoder = SubDecoder::new();
        let samples: Vec<_> = decoder.feed(&bytes, 0).collect();

        prop_assert_eq!(samples.len(), 1);
        prop_assert_eq!(samples[0].o2_adc, next.0 as i32);
        prop_assert_eq!(samples[0].co2_adc, next.1 as i32);
        prop_assert_eq!(decoder.corrupt_frames(), 1 + markers.len() as u64);
        prop_assert_eq!(decoder.stats().discarded_bytes, SUB_FRAME_LEN as u64);
    }

    /// 任意切分的字节流解出与整块输入相同的样本序列
    #[test]
    fn split_chunks_decode_all(
        codes in prop::collection::vec((any::<i16>(), any::<i16>()), 1..40),
        cuts in prop::collection::vec(1usize..16, 1..64),
    ) {
        let mut stream = Vec::new();
        for (o2, co2) in &codes {
            stream.extend_from_slice(&SubCodec::encode(*o2 as i32, *co2 as i32));
        }

        let mut decoder = SubDecoder::new();
        let mut decoded = Vec::new();
        let mut offset = 0;
        let mut ts = 0;
        for cut in cuts.iter().cycle() {
            if offset >= stream.len() {
                break;
            }
            let end = (offset + cut).min(stream.len());
            ts += 10;
            decoded.extend(decoder.feed(&stream[offset..end], ts).map(|s| (s.o2_adc, s.co2_adc)));
            offset = end;
        }

        let expected: Vec<(i32, i32)> =
            codes.iter().map(|(o2, co2)| (*o2 as i32, *co2 as i32)).collect();
        prop_assert_eq!(decoded, expected);
        prop_assert_eq!(decoder.corrupt_frames(), 0);
        prop_assert_eq!(decoder.pending_len(), 0);
    }

    /// 不含起始标记的垃圾前缀被整段跳过并计数
    #[test]
    fn garbage_prefix_is_counted(
        garbage in prop::collection::vec(any::<u8>().prop_filter("not a marker", |b| *b != 0xAA), 0..64),
    ) {
        let mut bytes = garbage.clone();
        bytes.extend_from_slice(&SubCodec::encode(877, 1229));

        let mut decoder = SubDecoder::new();
        let samples: Vec<_> = decoder.feed(&bytes, 0).collect();

        prop_assert_eq!(samples.len(), 1);
        prop_assert_eq!(decoder.stats().discarded_bytes, garbage.len() as u64);
        prop_assert_eq!(decoder.corrupt_frames(), 0);
    }
}
