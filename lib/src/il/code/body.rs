use crate::il::code::Instruction;
use crate::il::{Error, TypeSig};
use crate::util::{Offset, Width};
use std::fmt;

/// Stable handle to an instruction inside a [`Body`]
///
/// Handles are never invalidated: instructions are only ever added to a body, and an
/// instruction keeps its handle no matter where other instructions are inserted.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InsnId(u32);

impl fmt::Debug for InsnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i{}", self.0)
    }
}

/// Source position attached to an instruction (from the companion symbols)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SequencePoint {
    pub instruction: InsnId,
    pub line: u32,
    pub column: u16,
}

#[derive(Clone)]
struct Slot {
    instruction: Instruction<InsnId>,

    /// Derived from the layout by [`Body::recompute_offsets`]
    offset: Offset,
}

/// Method body: an arena of instructions plus the order in which they are laid out
///
/// Branch targets are handles into the arena, never byte offsets. Offsets are only derived
/// metadata, recomputed in one pass once all mutation is done (and checked before encoding).
#[derive(Clone)]
pub struct Body {
    /// Maximum height of the evaluation stack through the method
    pub max_stack: u16,

    /// Zero-initialize locals on entry
    pub init_locals: bool,

    /// Types of the local variable slots
    pub locals: Vec<TypeSig>,

    /// Debug positions, anchored to instructions
    pub sequence_points: Vec<SequencePoint>,

    /// Every instruction ever added to the body (indexed by `InsnId`)
    slots: Vec<Slot>,

    /// Order of instructions in the code (elements are unique and cover all of `slots`)
    layout: Vec<InsnId>,
}

impl Body {
    pub fn new() -> Body {
        Body {
            max_stack: 8,
            init_locals: false,
            locals: vec![],
            sequence_points: vec![],
            slots: vec![],
            layout: vec![],
        }
    }

    /// Build a body from instructions whose branch targets are positions in the same vector
    pub fn from_instructions(instructions: Vec<Instruction<usize>>) -> Result<Body, Error> {
        let count = instructions.len();
        let mut body = Body::new();
        for instruction in instructions {
            let instruction = instruction.map_labels(|position| {
                if *position < count {
                    Ok(InsnId(*position as u32))
                } else {
                    Err(Error::DanglingBranchTarget(InsnId(*position as u32)))
                }
            })?;
            body.place(body.layout.len(), instruction);
        }
        body.recompute_offsets();
        Ok(body)
    }

    /// Number of instructions
    pub fn len(&self) -> usize {
        self.layout.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.is_empty()
    }

    /// First instruction in the layout (the method entry point)
    pub fn first(&self) -> Option<InsnId> {
        self.layout.first().copied()
    }

    /// Handle of the instruction at some position in the layout
    pub fn id_at(&self, position: usize) -> Option<InsnId> {
        self.layout.get(position).copied()
    }

    /// Position of an instruction in the layout
    pub fn position(&self, id: InsnId) -> Option<usize> {
        self.layout.iter().position(|placed| *placed == id)
    }

    pub fn instruction(&self, id: InsnId) -> Option<&Instruction<InsnId>> {
        self.slots.get(id.0 as usize).map(|slot| &slot.instruction)
    }

    /// Offset of an instruction, as of the last [`Body::recompute_offsets`]
    pub fn offset(&self, id: InsnId) -> Option<Offset> {
        self.slots.get(id.0 as usize).map(|slot| slot.offset)
    }

    /// Iterate over instructions (with their handle and offset) in layout order
    pub fn iter(&self) -> impl Iterator<Item = (InsnId, Offset, &Instruction<InsnId>)> + '_ {
        self.layout.iter().map(move |id| {
            let slot = &self.slots[id.0 as usize];
            (*id, slot.offset, &slot.instruction)
        })
    }

    /// Append an instruction at the end of the layout
    pub fn push(&mut self, instruction: Instruction<InsnId>) -> Result<InsnId, Error> {
        self.check_targets(&instruction)?;
        Ok(self.place(self.layout.len(), instruction))
    }

    /// Insert an instruction immediately before `anchor`, returning the new handle
    pub fn insert_before(
        &mut self,
        anchor: InsnId,
        instruction: Instruction<InsnId>,
    ) -> Result<InsnId, Error> {
        let position = self
            .position(anchor)
            .ok_or(Error::UnknownInstruction(anchor))?;
        self.check_targets(&instruction)?;
        Ok(self.place(position, instruction))
    }

    /// Insert an instruction immediately after `anchor`, returning the new handle
    pub fn insert_after(
        &mut self,
        anchor: InsnId,
        instruction: Instruction<InsnId>,
    ) -> Result<InsnId, Error> {
        let position = self
            .position(anchor)
            .ok_or(Error::UnknownInstruction(anchor))?;
        self.check_targets(&instruction)?;
        Ok(self.place(position + 1, instruction))
    }

    fn check_targets(&self, instruction: &Instruction<InsnId>) -> Result<(), Error> {
        for target in instruction.branch_targets() {
            if target.0 as usize >= self.slots.len() {
                return Err(Error::DanglingBranchTarget(*target));
            }
        }
        Ok(())
    }

    fn place(&mut self, position: usize, instruction: Instruction<InsnId>) -> InsnId {
        let id = InsnId(self.slots.len() as u32);
        self.slots.push(Slot {
            instruction,
            offset: Offset(0),
        });
        self.layout.insert(position, id);
        id
    }

    /// Assign every instruction the running sum of the widths of the instructions before it
    ///
    /// Must run after the last structural change to the body and before it gets encoded. Returns
    /// the total code size.
    pub fn recompute_offsets(&mut self) -> Offset {
        let mut offset = Offset(0);
        for id in &self.layout {
            let slot = &mut self.slots[id.0 as usize];
            slot.offset = offset;
            offset.0 += slot.instruction.width();
        }
        offset
    }

    /// Check that `offset[0] = 0` and `offset[i + 1] = offset[i] + width[i]`
    pub fn offsets_are_current(&self) -> bool {
        let mut expected = Offset(0);
        for (_, offset, instruction) in self.iter() {
            if offset != expected {
                return false;
            }
            expected.0 += instruction.width();
        }
        true
    }

    /// Total width of the code (only meaningful if offsets are current)
    pub fn code_size(&self) -> Offset {
        match self.layout.last() {
            None => Offset(0),
            Some(id) => {
                let slot = &self.slots[id.0 as usize];
                Offset(slot.offset.0 + slot.instruction.width())
            }
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::new()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for (id, offset, instruction) in self.iter() {
            list.entry(&format_args!(
                "IL_{:04x} {:?}: {}",
                offset.0, id, instruction
            ));
        }
        list.finish()
    }
}
