//! Format propagation and auto-wiring (§4.8.3): builds the output codec
//! parameters the muxer must see, and rescales timestamps as units cross
//! stage boundaries.

use crate::error::{Error, ErrorKind, Result};
use crate::frame::Frame;
use crate::media_info::{CodecParameters, StreamDescriptor};
use crate::packet::Packet;
use crate::rational::Rational;

/// Stream-copy path: output stream parameters are copied verbatim from the
/// input stream descriptor; extradata may be rewritten by a bitstream
/// filter upstream of this call.
pub fn stream_copy_parameters(source: &StreamDescriptor, rewritten_extradata: Option<Vec<u8>>) -> CodecParameters {
    let mut params = source.codec_parameters.clone();
    if let Some(extradata) = rewritten_extradata {
        params.extradata = extradata;
    }
    params
}

/// Every packet crossing into the muxer is rescaled from its producer's
/// time base to the destination stream's time base.
pub fn rescale_packet_into_muxer(mut pkt: Packet, from: Rational, to: Rational) -> Packet {
    pkt.rescale_ts(from, to);
    pkt
}

/// Frames crossing from decoder to filter carry the decoder's time base;
/// validates non-decreasing pts isn't silently violated by a rescale.
pub fn rescale_frame_time_base(frame: &mut Frame, from: Rational, to: Rational) {
    if let Some(pts) = frame.pts() {
        frame.set_pts(Some(from.rescale(pts, to)));
    }
}

/// Hardware-frame containment check: a frame produced by a hardware-bound
/// decoder must not reach a stage that doesn't declare hardware awareness.
/// `hwdownload`/`format` is never auto-inserted (Open Question (a), decided
/// "no" — see the decision ledger).
pub fn check_hardware_containment(frame_is_hardware: bool, next_stage_is_hardware_aware: bool) -> Result<()> {
    if frame_is_hardware && !next_stage_is_hardware_aware {
        return Err(Error::new(
            ErrorKind::InvalidArgument,
            "hardware frame reached a stage with no declared hardware format; insert an explicit hwdownload/format filter",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardware_frame_into_incompatible_stage_is_rejected() {
        let err = check_hardware_containment(true, false).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn hardware_frame_into_aware_stage_is_allowed() {
        assert!(check_hardware_containment(true, true).is_ok());
    }

    #[test]
    fn software_frame_never_triggers_containment_check() {
        assert!(check_hardware_containment(false, false).is_ok());
    }

    #[test]
    fn packet_rescale_is_applied() {
        let mut pkt = Packet::empty();
        pkt.set_pts(Some(48000));
        let rescaled = rescale_packet_into_muxer(pkt, Rational::new(1, 48000), Rational::new(1, 1000));
        assert_eq!(rescaled.pts(), Some(1000));
    }
}
