// ── Tagged words ────────────────────────────────────────────────────
//
// Every slot of the stack, every local and every heap field is one u64.
// The low bits say what the rest means, so decoding needs no side table:
//
//   ...xxxx0   small integer, value << 1 (only the i32 range is produced)
//   ...xxx01   dictionary entry, index << 2
//   ...xx011   heap record, offset << 3
//   ...xx111   immediates: undefined, false, true (payload 0, 1, 2)
//
// Any other immediate payload, or an integer/index outside the ranges the
// engine produces, is an invalid word.

use std::fmt;

use super::dictionary::{DictIndex, Dictionary};
use super::heap::{Heap, ObjRef};
use crate::runtime::Value;

const INT_MASK: u64 = 0b1;
const REF_MASK: u64 = 0b11;
const DICT_TAG: u64 = 0b01;
const WIDE_MASK: u64 = 0b111;
const HEAP_TAG: u64 = 0b011;
const IMMEDIATE_TAG: u64 = 0b111;

const fn immediate(payload: u64) -> u64 {
    (payload << 3) | IMMEDIATE_TAG
}

#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Word(u64);

/// What a word means, after looking at its tag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tagged {
    Int(i32),
    Bool(bool),
    Undefined,
    Interned(DictIndex),
    Heap(ObjRef),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid tagged word {0:#x}")]
pub struct InvalidWord(pub u64);

impl Word {
    pub const UNDEFINED: Word = Word(immediate(0));
    pub const FALSE: Word = Word(immediate(1));
    pub const TRUE: Word = Word(immediate(2));

    #[inline]
    pub const fn from_int(n: i32) -> Word {
        Word(((n as i64) << 1) as u64)
    }

    #[inline]
    pub const fn from_bool(b: bool) -> Word {
        if b { Word::TRUE } else { Word::FALSE }
    }

    /// Stack/code positions stored in activation records.
    #[inline]
    pub(crate) const fn from_index(n: usize) -> Word {
        Word((n as u64) << 1)
    }

    #[inline]
    pub(crate) fn interned(index: DictIndex) -> Word {
        Word(((index.raw() as u64) << 2) | DICT_TAG)
    }

    #[inline]
    pub(crate) fn heap(r: ObjRef) -> Word {
        Word(((r.offset() as u64) << 3) | HEAP_TAG)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn from_raw(raw: u64) -> Word {
        Word(raw)
    }

    #[inline]
    pub fn is_int(self) -> bool {
        self.0 & INT_MASK == 0
    }

    pub fn as_int(self) -> Option<i32> {
        if !self.is_int() {
            return None;
        }
        i32::try_from((self.0 as i64) >> 1).ok()
    }

    pub(crate) fn as_index(self) -> Option<usize> {
        if !self.is_int() {
            return None;
        }
        usize::try_from((self.0 as i64) >> 1).ok()
    }

    pub fn tag(self) -> Result<Tagged, InvalidWord> {
        let invalid = InvalidWord(self.0);
        if self.is_int() {
            return self.as_int().map(Tagged::Int).ok_or(invalid);
        }
        if self.0 & REF_MASK == DICT_TAG {
            let index = u32::try_from(self.0 >> 2).map_err(|_| invalid)?;
            return Ok(Tagged::Interned(DictIndex::from_raw(index)));
        }
        match self.0 & WIDE_MASK {
            HEAP_TAG => {
                let offset = u32::try_from(self.0 >> 3).map_err(|_| invalid)?;
                Ok(Tagged::Heap(ObjRef::from_offset(offset)))
            }
            _ => match self {
                Word::UNDEFINED => Ok(Tagged::Undefined),
                Word::FALSE => Ok(Tagged::Bool(false)),
                Word::TRUE => Ok(Tagged::Bool(true)),
                _ => Err(invalid),
            },
        }
    }
}

impl From<Tagged> for Word {
    fn from(tagged: Tagged) -> Self {
        match tagged {
            Tagged::Int(n) => Word::from_int(n),
            Tagged::Bool(b) => Word::from_bool(b),
            Tagged::Undefined => Word::UNDEFINED,
            Tagged::Interned(index) => Word::interned(index),
            Tagged::Heap(r) => Word::heap(r),
        }
    }
}

impl fmt::Debug for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tag() {
            Ok(Tagged::Int(n)) => write!(f, "Word({})", n),
            Ok(Tagged::Bool(b)) => write!(f, "Word({})", b),
            Ok(Tagged::Undefined) => write!(f, "Word(undefined)"),
            Ok(Tagged::Interned(index)) => write!(f, "Word(dict#{})", index.raw()),
            Ok(Tagged::Heap(r)) => write!(f, "Word(heap@{})", r.offset()),
            Err(_) => write!(f, "Word({:#x}?)", self.0),
        }
    }
}

/// Pack a host value into a word, interning it when it needs identity.
pub fn encode(value: &Value, dict: &mut Dictionary) -> Word {
    match value {
        Value::Undefined => Word::UNDEFINED,
        Value::Bool(b) => Word::from_bool(*b),
        Value::Int(n) => Word::from_int(*n),
        Value::Ref(r) => Word::heap(*r),
        Value::Str(_) | Value::Object(_) | Value::Shape(_) => Word::interned(dict.intern(value)),
    }
}

/// Unpack a word into a host value. Heap references stay references: the
/// record is not copied out of the heap.
pub fn decode(word: Word, dict: &Dictionary, heap: &Heap) -> Result<Value, InvalidWord> {
    let invalid = InvalidWord(word.raw());
    Ok(match word.tag()? {
        Tagged::Int(n) => Value::Int(n),
        Tagged::Bool(b) => Value::Bool(b),
        Tagged::Undefined => Value::Undefined,
        Tagged::Interned(index) => dict.get(index).cloned().ok_or(invalid)?,
        Tagged::Heap(r) if heap.contains(r) => Value::Ref(r),
        Tagged::Heap(_) => return Err(invalid),
    })
}
