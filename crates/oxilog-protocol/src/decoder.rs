//! 通用帧解码器
//!
//! 每个通道一个实例，由该通道的读取线程独占。解码器在多次 `feed`
//! 之间保留半帧字节；帧校验失败时丢弃一个字节后重新扫描起始标记。

use crate::{Channel, MainCodec, ProtocolError, RawFrame, SubCodec};
use std::marker::PhantomData;
use tracing::{trace, warn};

/// 单通道线格式
///
/// 固定帧长、固定起始标记、校验和位于帧尾。
pub trait FrameCodec {
    /// 解码得到的样本类型
    type Sample;

    /// 所属通道
    const CHANNEL: Channel;

    /// 帧总长度（含起始标记与校验和）
    const FRAME_LEN: usize;

    /// 起始标记
    const START_MARKER: &'static [u8];

    /// 解析一个完整帧
    ///
    /// `frame` 长度必须等于 `FRAME_LEN`。校验和或取值范围错误返回 `Err`，
    /// 由解码器计为坏帧。
    fn parse(frame: &[u8], timestamp_us: u64) -> Result<Self::Sample, ProtocolError>;
}

/// 解码器诊断计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// 累计收到的字节数
    pub bytes_received: u64,
    /// 成功解码的帧数
    pub frames_decoded: u64,
    /// 校验或结构错误的帧数
    pub corrupt_frames: u64,
    /// 被丢弃的字节数（对齐垃圾 + 坏帧重同步）
    pub discarded_bytes: u64,
}

/// 帧解码器
pub struct FrameDecoder<C: FrameCodec> {
    pending: Vec<u8>,
    stats: DecoderStats,
    last_timestamp_us: u64,
    _codec: PhantomData<C>,
}

/// Main 通道解码器
pub type MainDecoder = FrameDecoder<MainCodec>;

/// Sub 通道解码器
pub type SubDecoder = FrameDecoder<SubCodec>;

impl<C: FrameCodec> FrameDecoder<C> {
    pub fn new() -> Self {
        Self {
            pending: Vec::with_capacity(C::FRAME_LEN * 4),
            stats: DecoderStats::default(),
            last_timestamp_us: 0,
            _codec: PhantomData,
        }
    }

    /// 追加一块字节并返回本次可解出的样本（惰性迭代）
    ///
    /// 本次完成的帧都使用 `arrival_us` 作为时间戳；时间戳被钳位为单调不减。
    /// 迭代器未耗尽即被丢弃时，剩余完整帧留在缓冲中，随下一次 `feed` 输出。
    pub fn feed(&mut self, chunk: &[u8], arrival_us: u64) -> Samples<'_, C> {
        self.pending.extend_from_slice(chunk);
        self.stats.bytes_received += chunk.len() as u64;

        let timestamp_us = arrival_us.max(self.last_timestamp_us);
        self.last_timestamp_us = timestamp_us;

        Samples {
            decoder: self,
            timestamp_us,
        }
    }

    /// 以 [`RawFrame`] 形式喂入
    ///
    /// 通道不匹配的块被忽略（只输出缓冲中已有的帧）。
    pub fn feed_raw(&mut self, raw: &RawFrame) -> Samples<'_, C> {
        if raw.channel != C::CHANNEL {
            warn!(
                "{} decoder received a chunk tagged {}, ignoring {} bytes",
                C::CHANNEL,
                raw.channel,
                raw.bytes.len()
            );
            let timestamp_us = self.last_timestamp_us;
            return Samples {
                decoder: self,
                timestamp_us,
            };
        }
        self.feed(&raw.bytes, raw.arrival_us)
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// 坏帧计数
    pub fn corrupt_frames(&self) -> u64 {
        self.stats.corrupt_frames
    }

    /// 缓冲中尚未成帧的字节数
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// 清空半帧缓冲（重连后调用），计数保留
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    /// 丢弃起始标记之前的字节
    ///
    /// 缓冲尾部的不完整起始标记保留，等待后续字节。
    fn align(&mut self) {
        let marker = C::START_MARKER;
        let skip = (0..self.pending.len())
            .find(|&i| {
                let tail = &self.pending[i..];
                let n = tail.len().min(marker.len());
                tail[..n] == marker[..n]
            })
            .unwrap_or(self.pending.len());

        if skip > 0 {
            trace!("{} decoder skipping {} alignment bytes", C::CHANNEL, skip);
            self.pending.drain(..skip);
            self.stats.discarded_bytes += skip as u64;
        }
    }

    fn next_sample(&mut self, timestamp_us: u64) -> Option<C::Sample> {
        loop {
            self.align();
            if self.pending.len() < C::FRAME_LEN {
                return None;
            }

            match C::parse(&self.pending[..C::FRAME_LEN], timestamp_us) {
                Ok(sample) => {
                    self.pending.drain(..C::FRAME_LEN);
                    self.stats.frames_decoded += 1;
                    return Some(sample);
                },
                Err(e) => {
                    self.stats.corrupt_frames += 1;
                    self.stats.discarded_bytes += 1;
                    self.pending.drain(..1);
                    warn!("{} frame corrupt, resyncing: {}", C::CHANNEL, e);
                },
            }
        }
    }
}

impl<C: FrameCodec> Default for FrameDecoder<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// `feed` 返回的样本迭代器
pub struct Samples<'a, C: FrameCodec> {
    decoder: &'a mut FrameDecoder<C>,
    timestamp_us: u64,
}

impl<C: FrameCodec> Iterator for Samples<'_, C> {
    type Item = C::Sample;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.next_sample(self.timestamp_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MainSample, StatusCode, StatusSet, SubSample};

    fn main_sample(spo2: u8) -> MainSample {
        MainSample {
            timestamp_us: 0,
            spo2,
            heart_rate: 72,
            pulse_amplitude: 45,
            status: [StatusCode::AlarmOff].into_iter().collect(),
        }
    }

    #[test]
    fn test_single_frame() {
        let mut decoder = MainDecoder::new();
        let frame = MainCodec::encode(&main_sample(98));

        let samples: Vec<_> = decoder.feed(&frame, 10).collect();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].spo2, 98);
        assert_eq!(samples[0].timestamp_us, 10);
        assert_eq!(decoder.pending_len(), 0);
        assert_eq!(decoder.stats().frames_decoded, 1);
    }

    #[test]
    fn test_frame_split_across_reads() {
        let mut decoder = MainDecoder::new();
        let frame = MainCodec::encode(&main_sample(97));

        assert_eq!(decoder.feed(&frame[..1], 1).count(), 0);
        assert_eq!(decoder.feed(&frame[1..5], 2).count(), 0);
        let samples: Vec<_> = decoder.feed(&frame[5..], 3).collect();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].timestamp_us, 3);
        assert_eq!(decoder.stats().discarded_bytes, 0);
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let mut decoder = SubDecoder::new();
        let mut bytes = Vec::new();
        for i in 0..5 {
            bytes.extend_from_slice(&SubCodec::encode(i * 100, i * 200));
        }

        let samples: Vec<SubSample> = decoder.feed(&bytes, 7).collect();
        assert_eq!(samples.len(), 5);
        assert_eq!(samples[4].o2_adc, 400);
        assert_eq!(samples[4].co2_adc, 800);
    }

    #[test]
    fn test_leading_garbage_skipped() {
        let mut decoder = SubDecoder::new();
        let mut bytes = vec![0x01, 0x02, 0x03];
        bytes.extend_from_slice(&SubCodec::encode(877, 1229));

        let samples: Vec<_> = decoder.feed(&bytes, 0).collect();
        assert_eq!(samples.len(), 1);
        assert_eq!(decoder.stats().discarded_bytes, 3);
        assert_eq!(decoder.corrupt_frames(), 0);
    }

    #[test]
    fn test_corrupt_frame_resync() {
        let mut decoder = MainDecoder::new();
        let mut bad = MainCodec::encode(&main_sample(90));
        bad[8] = bad[8].wrapping_add(1);
        let good = MainCodec::encode(&main_sample(96));

        let mut bytes = bad.to_vec();
        bytes.extend_from_slice(&good);

        let samples: Vec<_> = decoder.feed(&bytes, 0).collect();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].spo2, 96);
        assert_eq!(decoder.corrupt_frames(), 1);
        assert_eq!(decoder.stats().discarded_bytes, bad.len() as u64);
    }

    #[test]
    fn test_out_of_range_spo2_is_corrupt() {
        let mut decoder = MainDecoder::new();
        let bytes = MainCodec::encode_raw(120, 60, 1, 0);

        assert_eq!(decoder.feed(&bytes, 0).count(), 0);
        assert_eq!(decoder.corrupt_frames(), 1);
    }

    #[test]
    fn test_partial_marker_kept() {
        let mut decoder = MainDecoder::new();
        let frame = MainCodec::encode(&main_sample(99));

        // 垃圾 + 半个起始标记
        assert_eq!(decoder.feed(&[0x00, 0x11, 0xA5], 0).count(), 0);
        assert_eq!(decoder.pending_len(), 1);

        let samples: Vec<_> = decoder.feed(&frame[1..], 1).collect();
        assert_eq!(samples.len(), 1);
        assert_eq!(decoder.stats().discarded_bytes, 2);
    }

    #[test]
    fn test_timestamps_never_decrease() {
        let mut decoder = SubDecoder::new();
        let frame = SubCodec::encode(1, 1);

        let first: Vec<_> = decoder.feed(&frame, 1_000).collect();
        let second: Vec<_> = decoder.feed(&frame, 500).collect();
        assert_eq!(first[0].timestamp_us, 1_000);
        assert_eq!(second[0].timestamp_us, 1_000);
    }

    #[test]
    fn test_unconsumed_frames_survive() {
        let mut decoder = SubDecoder::new();
        let mut bytes = SubCodec::encode(1, 1).to_vec();
        bytes.extend_from_slice(&SubCodec::encode(2, 2));

        let first = decoder.feed(&bytes, 5).next();
        assert_eq!(first.map(|s| s.o2_adc), Some(1));

        let rest: Vec<_> = decoder.feed(&[], 6).collect();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].o2_adc, 2);
    }

    #[test]
    fn test_feed_raw_channel_mismatch() {
        let mut decoder = MainDecoder::new();
        let raw = RawFrame::new(Channel::Sub, 0, &SubCodec::encode(1, 1));

        assert_eq!(decoder.feed_raw(&raw).count(), 0);
        assert_eq!(decoder.stats().bytes_received, 0);

        let raw = RawFrame::new(
            Channel::Main,
            3,
            &MainCodec::encode(&MainSample {
                status: StatusSet::empty(),
                ..main_sample(95)
            }),
        );
        let samples: Vec<_> = decoder.feed_raw(&raw).collect();
        assert_eq!(samples.len(), 1);
        assert!(samples[0].status.is_empty());
    }

    #[test]
    fn test_reset_clears_pending() {
        let mut decoder = MainDecoder::new();
        let frame = MainCodec::encode(&main_sample(98));
        assert_eq!(decoder.feed(&frame[..4], 0).count(), 0);
        decoder.reset();
        assert_eq!(decoder.pending_len(), 0);
        assert_eq!(decoder.feed(&frame, 1).count(), 1);
    }
}
