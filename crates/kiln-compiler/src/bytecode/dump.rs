//! Binary chunk writer.
//!
//! Serializes a prototype tree in the Lua 5.3 precompiled chunk layout
//! (little-endian, 4-byte `int`, 8-byte `size_t`, 8-byte integers and
//! floats), so the output loads in any stock 5.3 virtual machine.

use tracing::debug;

use super::constant::Constant;
use super::proto::FunctionPrototype;

pub const LUA_SIGNATURE: &[u8; 4] = b"\x1bLua";
pub const LUAC_VERSION: u8 = 0x53;
pub const LUAC_FORMAT: u8 = 0;
pub const LUAC_DATA: &[u8; 6] = b"\x19\x93\r\n\x1a\n";
pub const LUAC_INT: i64 = 0x5678;
pub const LUAC_NUM: f64 = 370.5;

/// Length of the fixed header, before the main function's upvalue count.
pub const HEADER_SIZE: usize = 4 + 1 + 1 + 6 + 5 + 8 + 8;

/// Strings at most this long are written with the short-string tag.
const MAX_SHORT_LEN: usize = 40;

const TAG_NIL: u8 = 0;
const TAG_BOOLEAN: u8 = 1;
const TAG_FLOAT: u8 = 3;
const TAG_SHORT_STRING: u8 = 4;
const TAG_INTEGER: u8 = 3 | (1 << 4);
const TAG_LONG_STRING: u8 = 4 | (1 << 4);

/// Options for [`dump`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpOptions {
    /// Drop source names, line info, local and upvalue names.
    pub strip: bool,
}

/// Serialize `main` and its nested prototypes into a binary chunk.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn dump(main: &FunctionPrototype, options: DumpOptions) -> Vec<u8> {
    let mut writer = ChunkWriter::new(options);
    writer.header();
    writer.byte(main.upvalues.len() as u8);
    writer.function(main, None);
    debug!(
        bytes = writer.buf.len(),
        functions = main.count_functions(),
        strip = options.strip,
        "dumped chunk"
    );
    writer.buf
}

struct ChunkWriter {
    buf: Vec<u8>,
    strip: bool,
}

impl ChunkWriter {
    fn new(options: DumpOptions) -> Self {
        Self {
            buf: Vec::with_capacity(256),
            strip: options.strip,
        }
    }

    fn byte(&mut self, value: u8) {
        self.buf.push(value);
    }

    fn int(&mut self, value: u32) {
        self.buf.extend_from_slice(&(value as i32).to_le_bytes());
    }

    fn size(&mut self, value: usize) {
        self.buf.extend_from_slice(&(value as u64).to_le_bytes());
    }

    fn integer(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn number(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn string(&mut self, value: Option<&str>) {
        let Some(s) = value else {
            self.byte(0);
            return;
        };
        let size = s.len() + 1;
        if size < 0xff {
            self.byte(size as u8);
        } else {
            self.byte(0xff);
            self.size(size);
        }
        self.buf.extend_from_slice(s.as_bytes());
    }

    fn header(&mut self) {
        self.buf.extend_from_slice(LUA_SIGNATURE);
        self.byte(LUAC_VERSION);
        self.byte(LUAC_FORMAT);
        self.buf.extend_from_slice(LUAC_DATA);
        self.byte(4); // int
        self.byte(8); // size_t
        self.byte(4); // Instruction
        self.byte(8); // lua_Integer
        self.byte(8); // lua_Number
        self.integer(LUAC_INT);
        self.number(LUAC_NUM);
    }

    fn function(&mut self, proto: &FunctionPrototype, parent_source: Option<&str>) {
        let source = proto.source.as_deref();
        if self.strip || source.is_none() || source == parent_source {
            self.string(None);
        } else {
            self.string(source);
        }
        self.int(proto.line_defined);
        self.int(proto.last_line_defined);
        self.byte(proto.num_params);
        self.byte(proto.is_vararg as u8);
        self.byte(proto.max_stack_size);

        self.int(proto.code.len() as u32);
        for &word in &proto.code {
            self.buf.extend_from_slice(&word.to_le_bytes());
        }

        self.constants(&proto.constants);

        self.int(proto.upvalues.len() as u32);
        for up in &proto.upvalues {
            self.byte(up.in_stack as u8);
            self.byte(up.index);
        }

        self.int(proto.prototypes.len() as u32);
        let inherited = source.or(parent_source);
        for child in &proto.prototypes {
            self.function(child, inherited);
        }

        self.debug(proto);
    }

    fn constants(&mut self, constants: &[Constant]) {
        self.int(constants.len() as u32);
        for constant in constants {
            match constant {
                Constant::Nil => self.byte(TAG_NIL),
                Constant::Boolean(b) => {
                    self.byte(TAG_BOOLEAN);
                    self.byte(*b as u8);
                }
                Constant::Number(n) => {
                    self.byte(TAG_FLOAT);
                    self.number(*n);
                }
                Constant::Integer(i) => {
                    self.byte(TAG_INTEGER);
                    self.integer(*i);
                }
                Constant::String(s) => {
                    let tag = if s.len() <= MAX_SHORT_LEN {
                        TAG_SHORT_STRING
                    } else {
                        TAG_LONG_STRING
                    };
                    self.byte(tag);
                    self.string(Some(s));
                }
            }
        }
    }

    fn debug(&mut self, proto: &FunctionPrototype) {
        if self.strip {
            self.int(0);
            self.int(0);
            self.int(0);
            return;
        }

        self.int(proto.lines.len() as u32);
        for &line in &proto.lines {
            self.int(line);
        }

        self.int(proto.locals.len() as u32);
        for local in &proto.locals {
            self.string(Some(&local.name));
            self.int(local.start_pc);
            self.int(local.end_pc);
        }

        self.int(proto.upvalues.len() as u32);
        for up in &proto.upvalues {
            self.string(Some(&up.name));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::instruction::encode;
    use crate::bytecode::opcode::OpCode;
    use crate::bytecode::proto::{LocalVarInfo, UpvalueDesc};
    use pretty_assertions::assert_eq;

    fn main_proto() -> FunctionPrototype {
        FunctionPrototype {
            source: Some("@t.kn".into()),
            is_vararg: true,
            max_stack_size: 2,
            code: vec![encode(OpCode::Return, 0, 1, 0, 1).unwrap()],
            lines: vec![1],
            upvalues: vec![UpvalueDesc::new("_ENV", true, 0)],
            ..Default::default()
        }
    }

    fn read_i32(bytes: &[u8], at: usize) -> i32 {
        i32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
    }

    #[test]
    fn header_layout() {
        let bytes = dump(&main_proto(), DumpOptions::default());
        let mut expected = Vec::new();
        expected.extend_from_slice(b"\x1bLua\x53\x00\x19\x93\r\n\x1a\n");
        expected.extend_from_slice(&[4, 8, 4, 8, 8]);
        expected.extend_from_slice(&0x5678i64.to_le_bytes());
        expected.extend_from_slice(&370.5f64.to_le_bytes());
        assert_eq!(&bytes[..HEADER_SIZE], &expected[..]);
        // Main function upvalue count.
        assert_eq!(bytes[HEADER_SIZE], 1);
    }

    #[test]
    fn main_function_layout() {
        let bytes = dump(&main_proto(), DumpOptions::default());
        let mut at = HEADER_SIZE + 1;

        // Source: "@t.kn" with len+1 prefix.
        assert_eq!(bytes[at], 6);
        assert_eq!(&bytes[at + 1..at + 6], b"@t.kn");
        at += 6;

        assert_eq!(read_i32(&bytes, at), 0);
        assert_eq!(read_i32(&bytes, at + 4), 0);
        at += 8;
        assert_eq!(&bytes[at..at + 3], &[0, 1, 2]);
        at += 3;

        assert_eq!(read_i32(&bytes, at), 1);
        let word = u32::from_le_bytes(bytes[at + 4..at + 8].try_into().unwrap());
        assert_eq!(word, encode(OpCode::Return, 0, 1, 0, 1).unwrap());
        at += 8;

        // No constants, one upvalue (instack, 0), no prototypes.
        assert_eq!(read_i32(&bytes, at), 0);
        assert_eq!(read_i32(&bytes, at + 4), 1);
        assert_eq!(&bytes[at + 8..at + 10], &[1, 0]);
        assert_eq!(read_i32(&bytes, at + 10), 0);
    }

    #[test]
    fn constants_are_tagged() {
        let mut proto = main_proto();
        proto.constants = vec![
            Constant::Nil,
            Constant::Boolean(true),
            Constant::Number(1.5),
            Constant::Integer(-2),
            Constant::String("hi".into()),
        ];
        let mut writer = ChunkWriter::new(DumpOptions::default());
        writer.constants(&proto.constants);
        let bytes = writer.buf;

        let mut expected = 5i32.to_le_bytes().to_vec();
        expected.push(TAG_NIL);
        expected.extend_from_slice(&[TAG_BOOLEAN, 1]);
        expected.push(TAG_FLOAT);
        expected.extend_from_slice(&1.5f64.to_le_bytes());
        expected.push(19);
        expected.extend_from_slice(&(-2i64).to_le_bytes());
        expected.extend_from_slice(&[4, 3, b'h', b'i']);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn long_strings_use_wide_size() {
        let long = "x".repeat(300);
        let mut writer = ChunkWriter::new(DumpOptions::default());
        writer.constants(&[Constant::String(long.clone())]);
        let bytes = writer.buf;
        assert_eq!(bytes[4], TAG_LONG_STRING);
        assert_eq!(bytes[5], 0xff);
        assert_eq!(u64::from_le_bytes(bytes[6..14].try_into().unwrap()), 301);
        assert_eq!(&bytes[14..], long.as_bytes());
    }

    #[test]
    fn strip_drops_debug_info() {
        let mut proto = main_proto();
        proto.locals.push(LocalVarInfo {
            name: "a".into(),
            start_pc: 0,
            end_pc: 1,
        });
        let full = dump(&proto, DumpOptions::default());
        let stripped = dump(&proto, DumpOptions { strip: true });
        assert!(stripped.len() < full.len());
        // Null source.
        assert_eq!(stripped[HEADER_SIZE + 1], 0);
        // Trailing line info, locals and upvalue names are all empty.
        let tail = &stripped[stripped.len() - 12..];
        assert_eq!(tail, &[0u8; 12]);
    }

    #[test]
    fn children_inherit_source() {
        let mut proto = main_proto();
        let mut child = main_proto();
        child.source = Some("@t.kn".into());
        child.is_vararg = false;
        proto.prototypes.push(child);

        let with_child = dump(&proto, DumpOptions::default());
        let alone = dump(&main_proto(), DumpOptions::default());
        // Main debug section: one line, no locals, one upvalue name.
        let debug_len = (4 + 4) + 4 + (4 + 1 + "_ENV".len());
        let child_start = alone.len() - debug_len;
        // The child's source is written as a single null byte.
        assert_eq!(with_child[child_start], 0);
    }
}
