//! Static payload type registry (RFC 3551 Section 6)

/// Media clock rate in Hz for a static payload type, or `None` for dynamic
/// and unassigned types.
///
/// Used to extrapolate the RTP timestamp placed in sender reports when the
/// report is built some time after the last RTP packet went out.
pub fn standard_clock_rate(payload_type: u8) -> Option<u32> {
    match payload_type {
        // Audio
        0 => Some(8000),   // PCMU
        3 => Some(8000),   // GSM
        4 => Some(8000),   // G723
        5 => Some(8000),   // DVI4
        6 => Some(16000),  // DVI4
        7 => Some(8000),   // LPC
        8 => Some(8000),   // PCMA
        9 => Some(8000),   // G722
        10 => Some(44100), // L16 stereo
        11 => Some(44100), // L16 mono
        12 => Some(8000),  // QCELP
        13 => Some(8000),  // CN
        14 => Some(90000), // MPA
        15 => Some(8000),  // G728
        16 => Some(11025), // DVI4
        17 => Some(22050), // DVI4
        18 => Some(8000),  // G729
        // Video
        25 => Some(90000), // CelB
        26 => Some(90000), // JPEG
        28 => Some(90000), // nv
        31 => Some(90000), // H261
        32 => Some(90000), // MPV
        33 => Some(90000), // MP2T
        34 => Some(90000), // H263
        _ => None,
    }
}
