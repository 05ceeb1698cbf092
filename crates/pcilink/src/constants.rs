//! Link speed and width enumerations shared by the register decoders and the device layer.

use std::fmt;

/// PCIe link speeds, ordered slowest to fastest.
///
/// The discriminant doubles as the Current/Max Link Speed encoding used by the Link Status,
/// Link Capabilities and Link Control 2 registers (`1` = 2.5 GT/s, `2` = 5 GT/s, ...).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LinkSpeed {
    /// 2.5 GT/s (PCIe 1.x)
    LS2_5 = 1,
    /// 5 GT/s (PCIe 2.0)
    LS5_0 = 2,
    /// 8 GT/s (PCIe 3.0)
    LS8_0 = 3,
    /// 16 GT/s (PCIe 4.0)
    LS16_0 = 4,
    /// 32 GT/s (PCIe 5.0)
    LS32_0 = 5,
    /// 64 GT/s (PCIe 6.x)
    LS64_0 = 6,
    /// 128 GT/s (PCIe 7.0)
    LS128_0 = 7,
    Unknown = 8,
}

impl LinkSpeed {
    pub const ALL_KNOWN: [LinkSpeed; 7] = [
        LinkSpeed::LS2_5,
        LinkSpeed::LS5_0,
        LinkSpeed::LS8_0,
        LinkSpeed::LS16_0,
        LinkSpeed::LS32_0,
        LinkSpeed::LS64_0,
        LinkSpeed::LS128_0,
    ];

    /// Map a raw 4-bit speed code onto a speed. Codes without a defined speed map to
    /// [`LinkSpeed::Unknown`].
    pub fn from_code(code: u8) -> Self {
        Self::ALL_KNOWN
            .into_iter()
            .find(|speed| speed.code() == code)
            .unwrap_or(LinkSpeed::Unknown)
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_unknown(self) -> bool {
        self == LinkSpeed::Unknown
    }

    /// Parse the text found in the `max_link_speed`/`current_link_speed` attributes.
    ///
    /// Both the short form (`8 GT/s`) and the kernel's long form (`8.0 GT/s PCIe`) are accepted.
    pub fn from_sysfs(text: &str) -> Self {
        match text.trim() {
            "2.5 GT/s" | "2.5 GT/s PCIe" => LinkSpeed::LS2_5,
            "5 GT/s" | "5.0 GT/s" | "5.0 GT/s PCIe" => LinkSpeed::LS5_0,
            "8 GT/s" | "8.0 GT/s" | "8.0 GT/s PCIe" => LinkSpeed::LS8_0,
            "16 GT/s" | "16.0 GT/s" | "16.0 GT/s PCIe" => LinkSpeed::LS16_0,
            "32 GT/s" | "32.0 GT/s" | "32.0 GT/s PCIe" => LinkSpeed::LS32_0,
            "64 GT/s" | "64.0 GT/s" | "64.0 GT/s PCIe" => LinkSpeed::LS64_0,
            "128 GT/s" | "128.0 GT/s" | "128.0 GT/s PCIe" => LinkSpeed::LS128_0,
            _ => LinkSpeed::Unknown,
        }
    }
}

impl fmt::Display for LinkSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LinkSpeed::LS2_5 => "2.5 GT/s",
            LinkSpeed::LS5_0 => "5 GT/s",
            LinkSpeed::LS8_0 => "8 GT/s",
            LinkSpeed::LS16_0 => "16 GT/s",
            LinkSpeed::LS32_0 => "32 GT/s",
            LinkSpeed::LS64_0 => "64 GT/s",
            LinkSpeed::LS128_0 => "128 GT/s",
            LinkSpeed::Unknown => "Unknown",
        };
        f.write_str(text)
    }
}

/// Negotiated or maximum PCIe link width. The discriminant is the lane count.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LinkWidth {
    Unknown = 0,
    X1 = 1,
    X2 = 2,
    X4 = 4,
    X8 = 8,
    X12 = 12,
    X16 = 16,
    X32 = 32,
}

impl LinkWidth {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => LinkWidth::X1,
            2 => LinkWidth::X2,
            4 => LinkWidth::X4,
            8 => LinkWidth::X8,
            12 => LinkWidth::X12,
            16 => LinkWidth::X16,
            32 => LinkWidth::X32,
            _ => LinkWidth::Unknown,
        }
    }

    pub fn lanes(self) -> u8 {
        self as u8
    }

    pub fn is_unknown(self) -> bool {
        self == LinkWidth::Unknown
    }

    /// Parse the text found in the `max_link_width` attribute. The kernel writes a bare lane
    /// count (`4`); the `x4` spelling is accepted as well.
    pub fn from_sysfs(text: &str) -> Self {
        let text = text.trim();
        let digits = text.strip_prefix('x').unwrap_or(text);
        digits
            .parse::<u8>()
            .map(LinkWidth::from_code)
            .unwrap_or(LinkWidth::Unknown)
    }
}

impl fmt::Display for LinkWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkWidth::Unknown => f.write_str("Unknown"),
            width => write!(f, "x{}", width.lanes()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_codes_are_ordered_and_roundtrip() {
        let mut prev = 0;
        for speed in LinkSpeed::ALL_KNOWN {
            assert!(speed.code() > prev);
            prev = speed.code();
            assert_eq!(LinkSpeed::from_code(speed.code()), speed);
        }
        assert_eq!(LinkSpeed::from_code(0), LinkSpeed::Unknown);
        assert_eq!(LinkSpeed::from_code(0xF), LinkSpeed::Unknown);
        assert!(LinkSpeed::LS32_0 > LinkSpeed::LS8_0);
    }

    #[test]
    fn speed_parses_kernel_and_short_forms() {
        assert_eq!(LinkSpeed::from_sysfs("8.0 GT/s PCIe\n"), LinkSpeed::LS8_0);
        assert_eq!(LinkSpeed::from_sysfs("2.5 GT/s"), LinkSpeed::LS2_5);
        assert_eq!(LinkSpeed::from_sysfs("Unknown"), LinkSpeed::Unknown);
        assert_eq!(LinkSpeed::from_sysfs(""), LinkSpeed::Unknown);
        assert_eq!(LinkSpeed::LS16_0.to_string(), "16 GT/s");
    }

    #[test]
    fn width_parses_bare_and_prefixed_counts() {
        assert_eq!(LinkWidth::from_sysfs("4\n"), LinkWidth::X4);
        assert_eq!(LinkWidth::from_sysfs("x16"), LinkWidth::X16);
        assert_eq!(LinkWidth::from_sysfs("3"), LinkWidth::Unknown);
        assert_eq!(LinkWidth::from_sysfs("garbage"), LinkWidth::Unknown);
        assert_eq!(LinkWidth::X8.to_string(), "x8");
        assert_eq!(LinkWidth::Unknown.to_string(), "Unknown");
    }
}
