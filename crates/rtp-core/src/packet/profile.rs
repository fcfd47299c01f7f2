//! Static payload-type profiles for sample accounting.

/// How a payload type maps bytes to samples.
#[derive(Debug, Clone, Copy)]
enum Framing {
    /// One sample per payload byte (G.711, G.722)
    SamplePerByte,
    /// Fixed codec frames of `bytes` carrying `samples` each
    Framed { bytes: usize, samples: u32 },
}

/// A static audio payload-type profile.
#[derive(Debug)]
pub struct RtpProfile {
    pub name: &'static str,
    pub pt: u8,
    pub clock_rate: u32,
    framing: Framing,
}

impl RtpProfile {
    /// Samples carried by a payload of `size` bytes, and whether such
    /// payloads can be concatenated sample-exactly.
    pub fn samples_for(&self, size: usize) -> (u32, bool) {
        match self.framing {
            Framing::SamplePerByte => (size as u32, true),
            Framing::Framed { bytes, samples } => {
                let whole = (size / bytes) as u32;
                (whole * samples, size % bytes == 0)
            }
        }
    }
}

static PCMU: RtpProfile = RtpProfile {
    name: "PCMU",
    pt: 0,
    clock_rate: 8000,
    framing: Framing::SamplePerByte,
};

static GSM: RtpProfile = RtpProfile {
    name: "GSM",
    pt: 3,
    clock_rate: 8000,
    framing: Framing::Framed {
        bytes: 33,
        samples: 160,
    },
};

static PCMA: RtpProfile = RtpProfile {
    name: "PCMA",
    pt: 8,
    clock_rate: 8000,
    framing: Framing::SamplePerByte,
};

// G.722's RTP clock runs at 8 kHz for historical reasons; byte-per-sample
// accounting matches the wire behavior.
static G722: RtpProfile = RtpProfile {
    name: "G722",
    pt: 9,
    clock_rate: 8000,
    framing: Framing::SamplePerByte,
};

static G729: RtpProfile = RtpProfile {
    name: "G729",
    pt: 18,
    clock_rate: 8000,
    framing: Framing::Framed {
        bytes: 10,
        samples: 80,
    },
};

/// Look up the profile for a static payload type.
pub(crate) fn lookup(pt: u8) -> Option<&'static RtpProfile> {
    match pt {
        0 => Some(&PCMU),
        3 => Some(&GSM),
        8 => Some(&PCMA),
        9 => Some(&G722),
        18 => Some(&G729),
        _ => None,
    }
}
