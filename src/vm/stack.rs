use super::tagged::Word;

/// Words reserved above a frame's slots to link it to its caller.
pub const ACTIVATION_WORDS: usize = 3;

const SAVED_BP: usize = 0;
const SAVED_PC: usize = 1;
const CALLER: usize = 2;

/// A frame's place on the shared stack.
///
/// ```text
///   bp - 1           callee
///   bp               slot 0 (receiver)
///   bp + 1 ..        parameters, then locals
///   bp + slot_count  activation record (3 words)
///   ...              operands
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    bp: usize,
    slot_count: usize,
}

impl Frame {
    pub fn new(bp: usize, slot_count: usize) -> Self {
        Frame { bp, slot_count }
    }

    pub fn base(self) -> usize {
        self.bp
    }

    pub fn slot_count(self) -> usize {
        self.slot_count
    }

    /// Index of the activation record.
    pub fn activation(self) -> usize {
        self.bp + self.slot_count
    }

    /// Lowest index the operand stack of this frame may use.
    pub fn operands(self) -> usize {
        self.activation() + ACTIVATION_WORDS
    }
}

/// Decoded activation record. `saved_pc` is `None` only for the top-level
/// frame, whose record holds the `undefined` sentinel instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Activation {
    pub saved_bp: usize,
    pub saved_pc: Option<usize>,
    pub caller: Word,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StackError {
    #[error("stack overflow: capacity of {capacity} words exceeded")]
    Overflow { capacity: usize },
    #[error("stack underflow at {sp}")]
    Underflow { sp: usize },
    #[error("slot {slot} is outside a frame of {slot_count} slots")]
    Slot { slot: usize, slot_count: usize },
    #[error("corrupt activation record at {at}")]
    Activation { at: usize },
}

/// The one fixed-capacity array that holds every frame's slots, activation
/// records and operands.
///
/// All frame-relative access goes through the current [`Frame`], and pops
/// never reach below its operand region. Frames only change through
/// [`Stack::push_frame`] and [`Stack::pop_frame`].
pub struct Stack {
    words: Box<[Word]>,
    sp: usize,
    frame: Frame,
}

impl Stack {
    pub fn with_capacity(capacity: usize) -> Self {
        Stack {
            words: vec![Word::UNDEFINED; capacity].into_boxed_slice(),
            sp: 0,
            frame: Frame::new(0, 0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.words.len()
    }

    /// Next free index.
    pub fn pointer(&self) -> usize {
        self.sp
    }

    pub fn frame(&self) -> Frame {
        self.frame
    }

    /// Operand words of the current frame, bottom to top.
    pub fn operands(&self) -> &[Word] {
        let floor = self.floor();
        &self.words[floor..self.sp]
    }

    fn floor(&self) -> usize {
        if self.frame.slot_count == 0 && self.frame.bp == 0 {
            0
        } else {
            self.frame.operands()
        }
    }

    pub fn push(&mut self, word: Word) -> Result<(), StackError> {
        if self.sp >= self.words.len() {
            return Err(StackError::Overflow { capacity: self.words.len() });
        }
        self.words[self.sp] = word;
        self.sp += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Word, StackError> {
        if self.sp <= self.floor() {
            return Err(StackError::Underflow { sp: self.sp });
        }
        self.sp -= 1;
        Ok(self.words[self.sp])
    }

    pub fn peek(&self) -> Result<Word, StackError> {
        self.peek_at(0)
    }

    /// The word `depth` below the top.
    pub fn peek_at(&self, depth: usize) -> Result<Word, StackError> {
        if self.sp < self.floor() + depth + 1 {
            return Err(StackError::Underflow { sp: self.sp });
        }
        Ok(self.words[self.sp - 1 - depth])
    }

    pub fn swap(&mut self) -> Result<(), StackError> {
        if self.sp < self.floor() + 2 {
            return Err(StackError::Underflow { sp: self.sp });
        }
        self.words.swap(self.sp - 1, self.sp - 2);
        Ok(())
    }

    /// The top `n` words, bottom to top, left in place.
    pub fn top(&self, n: usize) -> Result<&[Word], StackError> {
        if self.sp < self.floor() + n {
            return Err(StackError::Underflow { sp: self.sp });
        }
        Ok(&self.words[self.sp - n..self.sp])
    }

    /// Drop the top `n` words.
    pub fn drop_top(&mut self, n: usize) -> Result<(), StackError> {
        if self.sp < self.floor() + n {
            return Err(StackError::Underflow { sp: self.sp });
        }
        self.sp -= n;
        Ok(())
    }

    fn slot_index(&self, slot: usize) -> Result<usize, StackError> {
        if slot < self.frame.slot_count {
            Ok(self.frame.bp + slot)
        } else {
            Err(StackError::Slot { slot, slot_count: self.frame.slot_count })
        }
    }

    pub fn slot(&self, slot: usize) -> Result<Word, StackError> {
        Ok(self.words[self.slot_index(slot)?])
    }

    pub fn set_slot(&mut self, slot: usize, word: Word) -> Result<(), StackError> {
        let at = self.slot_index(slot)?;
        self.words[at] = word;
        Ok(())
    }

    /// Enter `frame`, whose callee, receiver and arguments are already on
    /// the stack. The remaining slots start out `undefined`, then the
    /// activation record goes on top.
    pub fn push_frame(&mut self, frame: Frame, activation: Activation) -> Result<(), StackError> {
        debug_assert!(self.sp >= frame.bp && self.sp <= frame.activation());
        if frame.operands() > self.words.len() {
            return Err(StackError::Overflow { capacity: self.words.len() });
        }
        self.words[self.sp..frame.activation()].fill(Word::UNDEFINED);
        let at = frame.activation();
        self.words[at + SAVED_BP] = Word::from_index(activation.saved_bp);
        self.words[at + SAVED_PC] = activation.saved_pc.map_or(Word::UNDEFINED, Word::from_index);
        self.words[at + CALLER] = activation.caller;
        self.sp = frame.operands();
        self.frame = frame;
        Ok(())
    }

    /// Release the current frame, its slots and its callee word, and resume
    /// `caller`.
    pub fn pop_frame(&mut self, caller: Frame) {
        self.sp = self.frame.bp.saturating_sub(1);
        self.frame = caller;
    }

    /// The activation record of the current frame.
    pub fn activation(&self) -> Result<Activation, StackError> {
        self.activation_of(self.frame)
    }

    /// The activation record of any live frame.
    pub fn activation_of(&self, frame: Frame) -> Result<Activation, StackError> {
        let at = frame.activation();
        let corrupt = StackError::Activation { at };
        let record = self.words.get(at..at + ACTIVATION_WORDS).ok_or(corrupt.clone())?;
        let saved_bp = record[SAVED_BP].as_index().ok_or(corrupt.clone())?;
        let saved_pc = match record[SAVED_PC] {
            Word::UNDEFINED => None,
            w => Some(w.as_index().ok_or(corrupt)?),
        };
        Ok(Activation { saved_bp, saved_pc, caller: record[CALLER] })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn top_level(stack: &mut Stack, slot_count: usize) -> Frame {
        stack.push(Word::UNDEFINED).unwrap();
        let frame = Frame::new(1, slot_count);
        stack
            .push_frame(frame, Activation { saved_bp: 0, saved_pc: None, caller: Word::UNDEFINED })
            .unwrap();
        frame
    }

    #[test]
    fn frame_layout() {
        let mut stack = Stack::with_capacity(64);
        let frame = top_level(&mut stack, 3);
        assert_eq!(frame.activation(), 4);
        assert_eq!(stack.pointer(), 7);
        assert_eq!(stack.slot(2), Ok(Word::UNDEFINED));
        assert_eq!(
            stack.activation(),
            Ok(Activation { saved_bp: 0, saved_pc: None, caller: Word::UNDEFINED })
        );
    }

    #[test]
    fn slots_are_bounded_by_the_frame() {
        let mut stack = Stack::with_capacity(64);
        top_level(&mut stack, 2);
        stack.set_slot(1, Word::from_int(5)).unwrap();
        assert_eq!(stack.slot(1), Ok(Word::from_int(5)));
        assert_eq!(stack.slot(2), Err(StackError::Slot { slot: 2, slot_count: 2 }));
    }

    #[test]
    fn pops_stop_at_the_operand_floor() {
        let mut stack = Stack::with_capacity(64);
        top_level(&mut stack, 1);
        stack.push(Word::from_int(1)).unwrap();
        assert_eq!(stack.pop(), Ok(Word::from_int(1)));
        assert!(matches!(stack.pop(), Err(StackError::Underflow { .. })));
    }

    #[test]
    fn nested_frames_unwind_to_the_callee_slot() {
        let mut stack = Stack::with_capacity(64);
        let main = top_level(&mut stack, 1);
        let before = stack.pointer();

        stack.push(Word::from_int(100)).unwrap(); // callee
        stack.push(Word::UNDEFINED).unwrap(); // receiver
        stack.push(Word::from_int(2)).unwrap();
        stack.push(Word::from_int(3)).unwrap();
        let callee = Frame::new(before + 1, 4);
        stack
            .push_frame(
                callee,
                Activation { saved_bp: main.base(), saved_pc: Some(9), caller: Word::TRUE },
            )
            .unwrap();
        assert_eq!(stack.slot(1), Ok(Word::from_int(2)));
        assert_eq!(stack.slot(3), Ok(Word::UNDEFINED));
        let record = stack.activation().unwrap();
        assert_eq!(record.saved_pc, Some(9));
        assert_eq!(record.saved_bp, main.base());

        stack.pop_frame(main);
        assert_eq!(stack.pointer(), before);
        assert_eq!(stack.frame(), main);
    }

    #[test]
    fn overflow_is_reported() {
        let mut stack = Stack::with_capacity(2);
        assert_eq!(stack.capacity(), 2);
        stack.push(Word::UNDEFINED).unwrap();
        stack.push(Word::UNDEFINED).unwrap();
        assert_eq!(stack.push(Word::UNDEFINED), Err(StackError::Overflow { capacity: 2 }));
        assert_eq!(stack.pointer(), stack.capacity());

        let mut stack = Stack::with_capacity(4);
        stack.push(Word::UNDEFINED).unwrap();
        let frame = Frame::new(1, 1);
        let record = Activation { saved_bp: 0, saved_pc: None, caller: Word::UNDEFINED };
        assert!(stack.push_frame(frame, record).is_err());
    }
}
