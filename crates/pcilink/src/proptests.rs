use crate::{
    decode_link_capabilities, decode_link_status, AccessWidth, LinkSpeed, LinkWidth, Register,
    CAP_EXP,
};
use proptest::prelude::*;

fn width_strategy() -> impl Strategy<Value = AccessWidth> {
    prop_oneof![
        Just(AccessWidth::Byte),
        Just(AccessWidth::Word),
        Just(AccessWidth::Long),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_link_capabilities_fields(raw in any::<u32>()) {
        let caps = decode_link_capabilities(raw);
        prop_assert_eq!(caps.raw, raw);
        prop_assert_eq!(u32::from(caps.port_number), raw >> 24);
        prop_assert_eq!(u32::from(caps.max_speed), raw & 0xF);
        prop_assert_eq!(u32::from(caps.max_width), (raw >> 4) & 0x3F);
        prop_assert_eq!(caps.reserved(), raw & (1 << 23) != 0);
        prop_assert!(caps.l0s_exit_latency < 8 && caps.l1_exit_latency < 8);
    }

    #[test]
    fn prop_link_status_fields(raw in any::<u16>()) {
        let status = decode_link_status(raw);
        prop_assert_eq!(status.raw, raw);
        prop_assert_eq!(u16::from(status.link_speed), raw & 0xF);
        prop_assert_eq!(u16::from(status.link_width), (raw >> 4) & 0x3F);
        prop_assert_eq!(status.link_training, raw & 0x0800 != 0);
        prop_assert_eq!(status.dll_active, raw & 0x2000 != 0);
        prop_assert_eq!(u16::from(status.reserved()), raw >> 14);
    }

    #[test]
    fn prop_speed_codes_are_total(code in any::<u8>()) {
        let speed = LinkSpeed::from_code(code);
        if (1..=7).contains(&code) {
            prop_assert_eq!(speed.code(), code);
        } else {
            prop_assert!(speed.is_unknown());
        }
        let width = LinkWidth::from_code(code);
        prop_assert!(width.is_unknown() || width.lanes() == code);
    }

    #[test]
    fn prop_write_mnemonic_is_padded(offset in 0u16..0x100, width in width_strategy(), value in any::<u32>()) {
        let register = Register::new(CAP_EXP, offset, width);
        let mnemonic = register.write_mnemonic(value);
        let (read, hex) = mnemonic.split_once('=').unwrap();
        prop_assert_eq!(read, register.read_mnemonic());
        prop_assert_eq!(hex.len(), width.hex_digits());
        prop_assert_eq!(u32::from_str_radix(hex, 16).unwrap(), value & width.mask());
    }
}
