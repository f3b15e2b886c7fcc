/// The bytecode instruction set.
///
/// One byte of opcode followed by zero, one or two little-endian 32-bit
/// immediates; the table below records each instruction's total width in
/// bytes. The VM runs in the 8-byte-per-slot stack mode, so `PUSH_4` (the
/// compact-mode push) decodes but is rejected at runtime.
macro_rules! enumerate_instructions {
    ($(($name:ident, $width:expr)),+ $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[allow(non_camel_case_types)]
        #[repr(u8)]
        pub enum Instruction {
            $($name,)+
        }

        impl Instruction {
            pub fn to_str(self) -> &'static str {
                match self {
                    $(Instruction::$name => stringify!($name),)+
                }
            }
            /// The instruction's total width in bytes, opcode included.
            pub fn width(self) -> usize {
                match self {
                    $(Instruction::$name => $width,)+
                }
            }
        }

        impl TryFrom<u8> for Instruction {
            type Error = u8;
            fn try_from(value: u8) -> Result<Instruction, u8> {
                const INSTRUCTIONS: &[Instruction] = &[$(Instruction::$name,)+];
                INSTRUCTIONS.get(value as usize).copied().ok_or(value)
            }
        }
    };
}

enumerate_instructions![
    (PUSH_4, 5),
    (PUSH_8, 9),
    (POP_N_BELOW, 9),
    (ADD_I32, 1),
    (SUB_I32, 1),
    (MUL_I32, 1),
    (DIV_I32, 1),
    (COMPARE_LESS_THAN_I32, 1),
    (COMPARE_LESS_EQUAL_THAN_I32, 1),
    (COMPARE_MORE_THAN_I32, 1),
    (COMPARE_MORE_EQUAL_THAN_I32, 1),
    (COMPARE_EQUALS_I32, 1),
    (COMPARE_NOT_EQUALS_I32, 1),
    (LOGICAL_AND, 1),
    (LOGICAL_OR, 1),
    (REPUSH_N, 5),
    (REPUSH_FROM_N, 9),
    (JUMP, 5),
    (JUMP_IF_FALSE, 5),
    (CALL, 5),
    (RETURN, 5),
    (CREATE_LIST, 9),
];

#[cfg(test)]
mod tests {
    use super::Instruction;

    #[test]
    fn round_trips_through_opcodes() {
        for opcode in 0..=u8::MAX {
            if let Ok(instruction) = Instruction::try_from(opcode) {
                assert_eq!(instruction as u8, opcode);
            }
        }
        assert!(Instruction::try_from(0xff).is_err());
    }

    #[test]
    fn widths_cover_their_immediates() {
        assert_eq!(Instruction::ADD_I32.width(), 1);
        assert_eq!(Instruction::PUSH_8.width(), 9);
        assert_eq!(Instruction::CALL.width(), 5);
        assert_eq!(Instruction::CREATE_LIST.width(), 9);
    }
}
