//! Opaque encoded unit for one stream, moved between demuxer, bitstream
//! filter, encoder, and muxer stages.

use crate::rational::Rational;

/// Wraps `ffmpeg_next::Packet`. Cloning is reference-counted on the
/// underlying buffer, matching the "cloneable by reference-count" ownership
/// rule; the stream index carried here is this crate's own bookkeeping, not
/// FFmpeg's (packets don't know their stream index once detached from a
/// demuxer iteration).
#[derive(Clone)]
pub struct Packet {
    inner: ffmpeg_next::Packet,
    stream_index: usize,
    time_base: Rational,
}

impl Packet {
    /// `time_base` defaults to `1/1`; every producer (demuxer, encoder,
    /// bitstream filter) is responsible for overriding it with the actual
    /// time base its pts/dts/duration are expressed in via
    /// [`Packet::with_time_base`]/[`Packet::set_time_base`].
    pub fn from_ffmpeg(inner: ffmpeg_next::Packet, stream_index: usize) -> Self {
        Self {
            inner,
            stream_index,
            time_base: Rational::new(1, 1),
        }
    }

    pub fn empty() -> Self {
        Self {
            inner: ffmpeg_next::Packet::empty(),
            stream_index: 0,
            time_base: Rational::new(1, 1),
        }
    }

    pub fn with_time_base(mut self, time_base: Rational) -> Self {
        self.time_base = time_base;
        self
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn set_time_base(&mut self, time_base: Rational) {
        self.time_base = time_base;
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    pub fn set_stream_index(&mut self, index: usize) {
        self.stream_index = index;
        self.inner.set_stream(index);
    }

    pub fn pts(&self) -> Option<i64> {
        self.inner.pts()
    }

    pub fn set_pts(&mut self, pts: Option<i64>) {
        self.inner.set_pts(pts);
    }

    pub fn dts(&self) -> Option<i64> {
        self.inner.dts()
    }

    pub fn set_dts(&mut self, dts: Option<i64>) {
        self.inner.set_dts(dts);
    }

    pub fn duration(&self) -> i64 {
        self.inner.duration()
    }

    pub fn set_duration(&mut self, duration: i64) {
        self.inner.set_duration(duration);
    }

    pub fn is_key(&self) -> bool {
        self.inner.is_key()
    }

    pub fn is_corrupt(&self) -> bool {
        self.inner.is_corrupt()
    }

    pub fn data(&self) -> &[u8] {
        self.inner.data().unwrap_or(&[])
    }

    pub fn size(&self) -> usize {
        self.inner.size()
    }

    /// Rescales pts/dts/duration from `from` to `to`, used when a packet
    /// crosses a stage boundary into a stream with a different time base.
    pub fn rescale_ts(&mut self, from: Rational, to: Rational) {
        if let Some(pts) = self.pts() {
            self.set_pts(Some(from.rescale(pts, to)));
        }
        if let Some(dts) = self.dts() {
            self.set_dts(Some(from.rescale(dts, to)));
        }
        let duration = self.duration();
        self.set_duration(from.rescale(duration, to));
    }

    pub fn into_ffmpeg(self) -> ffmpeg_next::Packet {
        self.inner
    }

    pub fn as_ffmpeg(&self) -> &ffmpeg_next::Packet {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescale_ts_preserves_order_across_time_bases() {
        let mut pkt = Packet::empty();
        pkt.set_pts(Some(90000));
        pkt.set_dts(Some(90000));
        pkt.set_duration(9000);
        pkt.rescale_ts(Rational::new(1, 90000), Rational::new(1, 1000));
        pretty_assertions::assert_eq!((pkt.pts(), pkt.dts(), pkt.duration()), (Some(1000), Some(1000), 100));
    }

    #[test]
    fn stream_index_round_trips() {
        let mut pkt = Packet::empty();
        pkt.set_stream_index(3);
        assert_eq!(pkt.stream_index(), 3);
    }
}
