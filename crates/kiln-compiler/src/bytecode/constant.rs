//! Per-function constant pool.
//!
//! Literals referenced by `LOADK` and by register-or-constant operands are
//! interned here. Indices are dense from 0 and never change once handed out.

use std::fmt;

use rustc_hash::FxHashMap;

/// Values stored in the constant pool.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Nil,
    Boolean(bool),
    Integer(i64),
    /// Float literal.
    Number(f64),
    String(String),
}

impl Constant {
    /// Short type name, used by disassembly.
    pub fn type_name(&self) -> &'static str {
        match self {
            Constant::Nil => "nil",
            Constant::Boolean(_) => "boolean",
            Constant::Integer(_) => "integer",
            Constant::Number(_) => "number",
            Constant::String(_) => "string",
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Nil => f.write_str("nil"),
            Constant::Boolean(b) => write!(f, "{b}"),
            Constant::Integer(i) => write!(f, "{i}"),
            Constant::Number(n) if n.fract() == 0.0 && n.is_finite() => write!(f, "{n:.1}"),
            Constant::Number(n) => write!(f, "{n}"),
            Constant::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<bool> for Constant {
    fn from(value: bool) -> Self {
        Constant::Boolean(value)
    }
}

impl From<i64> for Constant {
    fn from(value: i64) -> Self {
        Constant::Integer(value)
    }
}

impl From<f64> for Constant {
    fn from(value: f64) -> Self {
        Constant::Number(value)
    }
}

impl From<&str> for Constant {
    fn from(value: &str) -> Self {
        Constant::String(value.to_string())
    }
}

impl From<String> for Constant {
    fn from(value: String) -> Self {
        Constant::String(value)
    }
}

/// Hashable form of [`Constant`]. Floats are keyed by bit pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstantKey {
    Nil,
    Boolean(bool),
    Integer(i64),
    Number(u64),
    String(String),
}

impl From<&Constant> for ConstantKey {
    fn from(constant: &Constant) -> Self {
        match constant {
            Constant::Nil => ConstantKey::Nil,
            Constant::Boolean(b) => ConstantKey::Boolean(*b),
            Constant::Integer(i) => ConstantKey::Integer(*i),
            Constant::Number(n) => ConstantKey::Number(n.to_bits()),
            Constant::String(s) => ConstantKey::String(s.clone()),
        }
    }
}

/// Interning table of constants with stable indices.
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    constants: Vec<Constant>,
    index: FxHashMap<ConstantKey, u32>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `constant`, appending it if this is its first occurrence.
    pub fn find_or_create(&mut self, constant: impl Into<Constant>) -> u32 {
        let constant = constant.into();
        let key = ConstantKey::from(&constant);

        if let Some(&idx) = self.index.get(&key) {
            return idx;
        }

        let idx = self.constants.len() as u32;
        self.constants.push(constant);
        self.index.insert(key, idx);
        idx
    }

    /// Index of an already interned constant.
    pub fn find(&self, constant: &Constant) -> Option<u32> {
        self.index.get(&ConstantKey::from(constant)).copied()
    }

    pub fn get(&self, index: u32) -> Option<&Constant> {
        self.constants.get(index as usize)
    }

    pub fn constants(&self) -> &[Constant] {
        &self.constants
    }

    pub fn len(&self) -> usize {
        self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    /// Give up the pool, keeping only the ordered values.
    pub fn into_vec(self) -> Vec<Constant> {
        self.constants
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_pool_is_empty() {
        let pool = ConstantPool::new();
        assert!(pool.is_empty());
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn equal_values_share_a_slot() {
        let mut pool = ConstantPool::new();
        let a = pool.find_or_create("x");
        let b = pool.find_or_create(42i64);
        let c = pool.find_or_create("x");
        let d = pool.find_or_create(42i64);

        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(a, c);
        assert_eq!(b, d);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn new_value_gets_next_index() {
        let mut pool = ConstantPool::new();
        for i in 0..10i64 {
            assert_eq!(pool.find_or_create(i), i as u32);
        }
        assert_eq!(pool.find_or_create(3i64), 3);
        assert_eq!(pool.find_or_create(Constant::Nil), 10);
    }

    #[test]
    fn integer_and_float_are_distinct() {
        let mut pool = ConstantPool::new();
        let int = pool.find_or_create(1i64);
        let float = pool.find_or_create(1.0f64);
        assert_ne!(int, float);
    }

    #[test]
    fn floats_are_keyed_by_bits() {
        let mut pool = ConstantPool::new();
        let pos = pool.find_or_create(0.0f64);
        let neg = pool.find_or_create(-0.0f64);
        assert_ne!(pos, neg);

        let nan1 = pool.find_or_create(f64::NAN);
        let nan2 = pool.find_or_create(f64::NAN);
        assert_eq!(nan1, nan2);
    }

    #[test]
    fn booleans_and_nil() {
        let mut pool = ConstantPool::new();
        let t = pool.find_or_create(true);
        let f = pool.find_or_create(false);
        let n = pool.find_or_create(Constant::Nil);
        assert_eq!((t, f, n), (0, 1, 2));
        assert_eq!(pool.find(&Constant::Boolean(false)), Some(1));
        assert_eq!(pool.find(&Constant::Integer(0)), None);
    }

    #[test]
    fn display() {
        assert_eq!(Constant::Number(2.0).to_string(), "2.0");
        assert_eq!(Constant::Number(2.5).to_string(), "2.5");
        assert_eq!(Constant::Integer(2).to_string(), "2");
        assert_eq!(Constant::from("hi").to_string(), "\"hi\"");
    }
}
