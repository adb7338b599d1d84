//! Fixed-width instruction words.
//!
//! ```text
//!  31        23        14        6      0
//! +---------+---------+--------+--------+
//! |    B    |    C    |   A    | opcode |   iABC
//! |       Bx          |   A    | opcode |   iABx
//! |       sBx         |   A    | opcode |   iAsBx
//! |            Ax              | opcode |   iAx
//! +---------+---------+--------+--------+
//! ```
//!
//! Fields declared as register-or-constant use bit 8 of their 9-bit field to
//! tell the two apart. A non-negative operand addresses a register. A
//! negative operand `v` addresses constant slot `-(v+1)`, so constant 0 is
//! written `-1`, constant 1 is `-2`, and so on.
//!
//! [`encode`] and [`decode`] are pure. They never truncate: a value that
//! does not fit its field is a [`CodegenError::OperandRange`].

use kiln_core::{CodegenError, OperandField, Result};

use super::opcode::{OpArgMode, OpCode, OpMode};

pub const SIZE_OP: u32 = 6;
pub const SIZE_A: u32 = 8;
pub const SIZE_B: u32 = 9;
pub const SIZE_C: u32 = 9;
pub const SIZE_BX: u32 = SIZE_B + SIZE_C;
pub const SIZE_AX: u32 = SIZE_A + SIZE_B + SIZE_C;

pub const POS_OP: u32 = 0;
pub const POS_A: u32 = POS_OP + SIZE_OP;
pub const POS_C: u32 = POS_A + SIZE_A;
pub const POS_B: u32 = POS_C + SIZE_C;
pub const POS_BX: u32 = POS_C;
pub const POS_AX: u32 = POS_A;

pub const MAXARG_A: i32 = (1 << SIZE_A) - 1;
pub const MAXARG_B: i32 = (1 << SIZE_B) - 1;
pub const MAXARG_C: i32 = (1 << SIZE_C) - 1;
pub const MAXARG_BX: i32 = (1 << SIZE_BX) - 1;
/// Bias of the signed sBx field: half the range of Bx.
pub const MAXARG_SBX: i32 = MAXARG_BX >> 1;
pub const MAXARG_AX: i32 = (1 << SIZE_AX) - 1;

/// Marks the constant half of a 9-bit register-or-constant field.
pub const BITRK: u32 = 1 << (SIZE_B - 1);
/// Largest constant slot a register-or-constant field can address.
pub const MAXINDEXRK: i32 = BITRK as i32 - 1;

/// Register-or-constant operand for constant slot `slot`.
#[inline]
pub fn rk_constant(slot: u32) -> i32 {
    -(slot as i32) - 1
}

/// Whether a register-or-constant operand addresses the constant pool.
#[inline]
pub fn is_constant_operand(operand: i32) -> bool {
    operand < 0
}

/// Constant slot addressed by a negative register-or-constant operand.
#[inline]
pub fn constant_slot(operand: i32) -> u32 {
    !operand as u32
}

/// One instruction before encoding.
///
/// `b` carries Bx or sBx for the wide formats and `a` carries Ax for the
/// extra-wide format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub op: OpCode,
    pub a: i32,
    pub b: i32,
    pub c: i32,
    /// Debug line, stamped when the instruction is appended.
    pub line: u32,
}

impl Instruction {
    pub fn abc(op: OpCode, a: i32, b: i32, c: i32) -> Self {
        Self {
            op,
            a,
            b,
            c,
            line: 0,
        }
    }

    pub fn abx(op: OpCode, a: i32, bx: i32) -> Self {
        Self::abc(op, a, bx, 0)
    }

    pub fn asbx(op: OpCode, a: i32, sbx: i32) -> Self {
        Self::abc(op, a, sbx, 0)
    }

    pub fn ax(op: OpCode, ax: i32) -> Self {
        Self::abc(op, ax, 0, 0)
    }

    /// Bx of a wide-unsigned instruction.
    pub fn bx(&self) -> i32 {
        self.b
    }

    /// sBx of a wide-signed instruction.
    pub fn sbx(&self) -> i32 {
        self.b
    }

    /// Encode into a 32-bit word, range-checking every field.
    pub fn encode(&self) -> Result<u32> {
        encode(self.op, self.a, self.b, self.c, self.line)
    }
}

/// Bounds an instruction's table references must respect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperandBounds {
    pub constants: usize,
    pub upvalues: usize,
    pub prototypes: usize,
    /// Whether the function has an enclosing function.
    pub has_container: bool,
}

impl Instruction {
    /// Encode the instruction and check that every table it references
    /// exists in the owning function.
    ///
    /// `previous` is the instruction this one follows; an `EXTRAARG` after
    /// `LOADKX` is checked as a constant index.
    pub fn validate(&self, bounds: &OperandBounds, previous: Option<&Instruction>) -> Result<u32> {
        let word = self.encode()?;
        let op = self.op;

        match op {
            OpCode::LoadK => self.check_constant(self.bx() as u32, bounds)?,
            OpCode::ExtraArg if previous.map(|p| p.op) == Some(OpCode::LoadKx) => {
                self.check_constant(self.a as u32, bounds)?
            }
            OpCode::GetUpval | OpCode::SetUpval | OpCode::GetTabUp => {
                self.check_upvalue(self.b, bounds)?
            }
            OpCode::SetTabUp => self.check_upvalue(self.a, bounds)?,
            OpCode::Closure => {
                let index = self.bx();
                if index as usize >= bounds.prototypes {
                    return Err(CodegenError::out_of_range(
                        op.name(),
                        OperandField::Prototype,
                        index as i64,
                        0,
                        bounds.prototypes as i64 - 1,
                        self.line,
                    ));
                }
            }
            _ => {}
        }

        if op.mode() == OpMode::ABC {
            if op.arg_b() == OpArgMode::K && is_constant_operand(self.b) {
                self.check_constant(constant_slot(self.b), bounds)?;
            }
            if op.arg_c() == OpArgMode::K && is_constant_operand(self.c) {
                self.check_constant(constant_slot(self.c), bounds)?;
            }
        }

        Ok(word)
    }

    fn check_constant(&self, slot: u32, bounds: &OperandBounds) -> Result<()> {
        if (slot as usize) < bounds.constants {
            return Ok(());
        }
        Err(CodegenError::out_of_range(
            self.op.name(),
            OperandField::Constant,
            slot as i64,
            0,
            bounds.constants as i64 - 1,
            self.line,
        ))
    }

    fn check_upvalue(&self, index: i32, bounds: &OperandBounds) -> Result<()> {
        // Only the environment upvalue exists above the outermost function.
        let limit = if bounds.has_container {
            bounds.upvalues
        } else {
            bounds.upvalues.min(1)
        };
        if (index as usize) < limit {
            return Ok(());
        }
        Err(CodegenError::out_of_range(
            self.op.name(),
            OperandField::Upvalue,
            index as i64,
            0,
            limit as i64 - 1,
            self.line,
        ))
    }
}

fn field(
    op: OpCode,
    field: OperandField,
    value: i32,
    min: i32,
    max: i32,
    line: u32,
) -> Result<u32> {
    if value < min || value > max {
        return Err(CodegenError::out_of_range(
            op.name(),
            field,
            value as i64,
            min as i64,
            max as i64,
            line,
        ));
    }
    Ok(value as u32)
}

/// Encode a 9-bit B or C field according to its argument mode.
fn arg_field(
    op: OpCode,
    name: OperandField,
    mode: OpArgMode,
    value: i32,
    line: u32,
) -> Result<u32> {
    match mode {
        OpArgMode::K => {
            let raw = field(op, name, value, -(MAXINDEXRK + 1), MAXINDEXRK, line)?;
            if is_constant_operand(value) {
                Ok(constant_slot(value) | BITRK)
            } else {
                Ok(raw)
            }
        }
        OpArgMode::N | OpArgMode::U | OpArgMode::R => field(op, name, value, 0, MAXARG_B, line),
    }
}

/// Pack an instruction into a 32-bit word.
///
/// `line` only appears in error messages.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn encode(op: OpCode, a: i32, b: i32, c: i32, line: u32) -> Result<u32> {
    let opcode = u8::from(op) as u32;
    match op.mode() {
        OpMode::ABC => {
            let a = field(op, OperandField::A, a, 0, MAXARG_A, line)?;
            let b = arg_field(op, OperandField::B, op.arg_b(), b, line)?;
            let c = arg_field(op, OperandField::C, op.arg_c(), c, line)?;
            Ok(opcode << POS_OP | a << POS_A | c << POS_C | b << POS_B)
        }
        OpMode::ABx => {
            let a = field(op, OperandField::A, a, 0, MAXARG_A, line)?;
            let bx = field(op, OperandField::Bx, b, 0, MAXARG_BX, line)?;
            Ok(opcode << POS_OP | a << POS_A | bx << POS_BX)
        }
        OpMode::AsBx => {
            let a = field(op, OperandField::A, a, 0, MAXARG_A, line)?;
            field(
                op,
                OperandField::SBx,
                b,
                -MAXARG_SBX,
                MAXARG_BX - MAXARG_SBX,
                line,
            )?;
            let biased = (b + MAXARG_SBX) as u32;
            Ok(opcode << POS_OP | a << POS_A | biased << POS_BX)
        }
        OpMode::Ax => {
            let ax = field(op, OperandField::Ax, a, 0, MAXARG_AX, line)?;
            Ok(opcode << POS_OP | ax << POS_AX)
        }
    }
}

#[inline]
fn bits(word: u32, pos: u32, size: u32) -> u32 {
    (word >> pos) & ((1 << size) - 1)
}

fn decode_arg(mode: OpArgMode, raw: u32) -> i32 {
    if mode == OpArgMode::K && raw & BITRK != 0 {
        rk_constant(raw & !BITRK)
    } else {
        raw as i32
    }
}

/// Unpack a 32-bit word. The decoded instruction has line 0.
pub fn decode(word: u32) -> Result<Instruction> {
    let raw_op = bits(word, POS_OP, SIZE_OP);
    let op = OpCode::from_u8(raw_op as u8).ok_or_else(|| {
        CodegenError::out_of_range(
            "decode",
            OperandField::Opcode,
            raw_op as i64,
            0,
            super::opcode::NUM_OPCODES as i64 - 1,
            0,
        )
    })?;

    let instruction = match op.mode() {
        OpMode::ABC => Instruction::abc(
            op,
            bits(word, POS_A, SIZE_A) as i32,
            decode_arg(op.arg_b(), bits(word, POS_B, SIZE_B)),
            decode_arg(op.arg_c(), bits(word, POS_C, SIZE_C)),
        ),
        OpMode::ABx => Instruction::abx(
            op,
            bits(word, POS_A, SIZE_A) as i32,
            bits(word, POS_BX, SIZE_BX) as i32,
        ),
        OpMode::AsBx => Instruction::asbx(
            op,
            bits(word, POS_A, SIZE_A) as i32,
            bits(word, POS_BX, SIZE_BX) as i32 - MAXARG_SBX,
        ),
        OpMode::Ax => Instruction::ax(op, bits(word, POS_AX, SIZE_AX) as i32),
    };
    Ok(instruction)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(instruction: Instruction) {
        let word = instruction.encode().unwrap();
        assert_eq!(decode(word).unwrap(), instruction, "word {word:#010x}");
    }

    #[test]
    fn field_layout() {
        assert_eq!(POS_A, 6);
        assert_eq!(POS_C, 14);
        assert_eq!(POS_B, 23);
        assert_eq!(MAXARG_BX, 262_143);
        assert_eq!(MAXARG_SBX, 131_071);
        assert_eq!(MAXARG_AX, 67_108_863);
    }

    #[test]
    fn encode_abc_places_fields_in_acb_order() {
        let word = encode(OpCode::Move, 1, 2, 0, 1).unwrap();
        assert_eq!(word, 1 << 6 | 2 << 23);

        let word = encode(OpCode::Call, 3, 2, 1, 1).unwrap();
        assert_eq!(word & 0x3f, 36);
        assert_eq!(bits(word, POS_A, SIZE_A), 3);
        assert_eq!(bits(word, POS_B, SIZE_B), 2);
        assert_eq!(bits(word, POS_C, SIZE_C), 1);
    }

    #[test]
    fn k_operand_sets_constant_bit() {
        let word = encode(OpCode::Add, 0, rk_constant(0), 1, 1).unwrap();
        assert_eq!(bits(word, POS_B, SIZE_B), BITRK);
        assert_eq!(bits(word, POS_C, SIZE_C), 1);

        let word = encode(OpCode::Add, 0, 255, rk_constant(255), 1).unwrap();
        assert_eq!(bits(word, POS_B, SIZE_B), 255);
        assert_eq!(bits(word, POS_C, SIZE_C), BITRK | 255);
    }

    #[test]
    fn k_field_registers_and_constants_never_collide() {
        let mut seen = std::collections::HashSet::new();
        for register in 0..=255 {
            assert!(seen.insert(arg_field(OpCode::Add, OperandField::B, OpArgMode::K, register, 0).unwrap()));
        }
        for slot in 0..=255u32 {
            let encoded =
                arg_field(OpCode::Add, OperandField::B, OpArgMode::K, rk_constant(slot), 0).unwrap();
            assert!(seen.insert(encoded), "constant {slot} collides");
        }
        assert_eq!(seen.len(), 512);
    }

    #[test]
    fn k_operand_out_of_range() {
        let err = encode(OpCode::Add, 0, 256, 0, 9).unwrap_err();
        assert_eq!(
            err,
            CodegenError::OperandRange {
                context: "ADD",
                field: OperandField::B,
                value: 256,
                min: -256,
                max: 255,
                line: 9,
            }
        );
        assert!(encode(OpCode::Add, 0, 0, rk_constant(256), 9).is_err());
    }

    #[test]
    fn a_out_of_range() {
        let err = encode(OpCode::Move, 256, 0, 0, 4).unwrap_err();
        assert!(matches!(
            err,
            CodegenError::OperandRange { field: OperandField::A, value: 256, .. }
        ));
        assert!(encode(OpCode::Move, -1, 0, 0, 4).is_err());
    }

    #[test]
    fn plain_fields_reject_negative() {
        assert!(encode(OpCode::Call, 0, -1, 1, 1).is_err());
        assert!(encode(OpCode::Call, 0, 512, 1, 1).is_err());
        assert!(encode(OpCode::Call, 0, 511, 511, 1).is_ok());
    }

    #[test]
    fn bx_range() {
        assert!(encode(OpCode::LoadK, 0, MAXARG_BX, 0, 1).is_ok());
        let err = encode(OpCode::LoadK, 0, MAXARG_BX + 1, 0, 1).unwrap_err();
        assert!(matches!(err, CodegenError::OperandRange { field: OperandField::Bx, .. }));
    }

    #[test]
    fn sbx_is_biased() {
        let word = encode(OpCode::Jmp, 0, 0, 0, 1).unwrap();
        assert_eq!(bits(word, POS_BX, SIZE_BX), MAXARG_SBX as u32);

        let word = encode(OpCode::Jmp, 0, -MAXARG_SBX, 0, 1).unwrap();
        assert_eq!(bits(word, POS_BX, SIZE_BX), 0);

        assert!(encode(OpCode::Jmp, 0, -MAXARG_SBX - 1, 0, 1).is_err());
        assert!(encode(OpCode::Jmp, 0, MAXARG_SBX + 1, 0, 1).is_ok());
        assert!(encode(OpCode::Jmp, 0, MAXARG_SBX + 2, 0, 1).is_err());
    }

    #[test]
    fn ax_range() {
        let word = encode(OpCode::ExtraArg, MAXARG_AX, 0, 0, 1).unwrap();
        assert_eq!(word >> POS_AX, MAXARG_AX as u32);
        assert!(encode(OpCode::ExtraArg, MAXARG_AX + 1, 0, 0, 1).is_err());
    }

    #[test]
    fn decode_rejects_unknown_opcode() {
        let err = decode(63).unwrap_err();
        assert!(matches!(
            err,
            CodegenError::OperandRange { field: OperandField::Opcode, value: 63, .. }
        ));
    }

    #[test]
    fn roundtrip_small_ranges_exhaustive() {
        for op in OpCode::all() {
            match op.mode() {
                OpMode::ABC => {
                    let b_values: Vec<i32> = match op.arg_b() {
                        OpArgMode::K => (-256..=255).step_by(7).chain([-256, -1, 0, 255]).collect(),
                        _ => (0..=511).step_by(13).chain([0, 511]).collect(),
                    };
                    let c_values: Vec<i32> = match op.arg_c() {
                        OpArgMode::K => vec![-256, -3, -1, 0, 1, 254, 255],
                        _ => vec![0, 1, 256, 511],
                    };
                    for a in [0, 1, 127, 255] {
                        for &b in &b_values {
                            for &c in &c_values {
                                roundtrip(Instruction::abc(op, a, b, c));
                            }
                        }
                    }
                }
                OpMode::ABx => {
                    for a in 0..=255 {
                        for bx in [0, 1, 255, 256, 131_071, MAXARG_BX] {
                            roundtrip(Instruction::abx(op, a, bx));
                        }
                    }
                }
                OpMode::AsBx => {
                    for a in [0, 1, 255] {
                        for sbx in (-MAXARG_SBX..=MAXARG_SBX + 1).step_by(4099) {
                            roundtrip(Instruction::asbx(op, a, sbx));
                        }
                        roundtrip(Instruction::asbx(op, a, MAXARG_SBX + 1));
                    }
                }
                OpMode::Ax => {
                    for ax in (0..=MAXARG_AX).step_by(65_537) {
                        roundtrip(Instruction::ax(op, ax));
                    }
                    roundtrip(Instruction::ax(op, MAXARG_AX));
                }
            }
        }
    }

    #[test]
    fn encode_is_pure() {
        let instruction = Instruction::abc(OpCode::SetTable, 1, rk_constant(3), 2);
        assert_eq!(instruction.encode().unwrap(), instruction.encode().unwrap());
    }

    fn bounds(constants: usize, upvalues: usize, has_container: bool) -> OperandBounds {
        OperandBounds {
            constants,
            upvalues,
            prototypes: 0,
            has_container,
        }
    }

    #[test]
    fn validate_constant_bounds() {
        let b = bounds(2, 1, false);
        assert!(Instruction::abx(OpCode::LoadK, 0, 1).validate(&b, None).is_ok());
        let err = Instruction::abx(OpCode::LoadK, 0, 2).validate(&b, None).unwrap_err();
        assert!(matches!(
            err,
            CodegenError::OperandRange { field: OperandField::Constant, value: 2, max: 1, .. }
        ));

        assert!(Instruction::abc(OpCode::Add, 0, rk_constant(1), 0).validate(&b, None).is_ok());
        assert!(Instruction::abc(OpCode::Add, 0, 0, rk_constant(2)).validate(&b, None).is_err());
    }

    #[test]
    fn validate_extra_arg_after_loadkx() {
        let b = bounds(3, 1, false);
        let loadkx = Instruction::abx(OpCode::LoadKx, 0, 0);
        assert!(Instruction::ax(OpCode::ExtraArg, 2).validate(&b, Some(&loadkx)).is_ok());
        assert!(Instruction::ax(OpCode::ExtraArg, 3).validate(&b, Some(&loadkx)).is_err());
        // Not a constant index when following anything else.
        assert!(Instruction::ax(OpCode::ExtraArg, 3).validate(&b, None).is_ok());
    }

    #[test]
    fn validate_upvalue_bounds() {
        let nested = bounds(0, 2, true);
        assert!(Instruction::abc(OpCode::GetUpval, 0, 1, 0).validate(&nested, None).is_ok());
        assert!(Instruction::abc(OpCode::GetUpval, 0, 2, 0).validate(&nested, None).is_err());
        assert!(Instruction::abc(OpCode::SetTabUp, 1, 0, 0).validate(&nested, None).is_ok());

        let top_level = bounds(0, 2, false);
        assert!(Instruction::abc(OpCode::GetTabUp, 0, 0, 0).validate(&top_level, None).is_ok());
        let err = Instruction::abc(OpCode::GetTabUp, 0, 1, 0)
            .validate(&top_level, None)
            .unwrap_err();
        assert!(matches!(
            err,
            CodegenError::OperandRange { field: OperandField::Upvalue, value: 1, max: 0, .. }
        ));
    }

    #[test]
    fn validate_closure_index() {
        let mut b = bounds(0, 1, false);
        assert!(Instruction::abx(OpCode::Closure, 0, 0).validate(&b, None).is_err());
        b.prototypes = 1;
        assert!(Instruction::abx(OpCode::Closure, 0, 0).validate(&b, None).is_ok());
    }
}
