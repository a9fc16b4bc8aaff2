//! This module contains the AST of IL instructions. The representation is slightly different
//! from the raw opcode table to make it more convenient to generate code:
//!
//!   - The short and long encodings of loads, stores and constants (`ldarg.0`, `ldarg.s`,
//!     `ldarg`) are merged into one instruction, and the shortest encoding is picked on output
//!
//!   - Conditional and unconditional branches get abstracted into one instruction with a
//!     [`BranchCondition`]. The short form of branches is kept distinct, since whether a short
//!     branch still reaches its target is exactly what changes when code is spliced in
//!
//!   - Only the opcodes this tool needs to read, write or generate are present
//!

use crate::il::{MethodRef, RenderSignature, TypeSig};
use crate::util::Width;
use std::fmt;

/// IL instruction, generic over the representation of branch targets
///
/// Inside a [`Body`](super::Body) targets are instruction handles. While reading they are
/// absolute byte offsets, and just before writing they become displacements relative to the end
/// of the branch instruction.
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction<Lbl> {
    Nop,
    LdArg(u16), // covers `ldarg.{0,3}`, `ldarg.s`, and `ldarg`
    StArg(u16), // covers `starg.s` and `starg`
    LdLoc(u16), // covers `ldloc.{0,3}`, `ldloc.s`, and `ldloc`
    StLoc(u16), // covers `stloc.{0,3}`, `stloc.s`, and `stloc`
    LdNull,
    LdcI4(i32), // covers `ldc.i4.m1`, `ldc.i4.{0,8}`, `ldc.i4.s`, and `ldc.i4`
    LdcI8(i64),
    LdcR4(f32),
    LdcR8(f64),
    Dup,
    Pop,
    Call(MethodRef),
    CallVirt(MethodRef),
    NewObj(MethodRef),
    Ret,
    Branch(BranchCondition, Lbl),      // covers `br`, `brfalse`, `brtrue`, `beq`, ... `bne.un`
    ShortBranch(BranchCondition, Lbl), // covers `br.s`, `brfalse.s`, ... `bne.un.s`
    Switch(Vec<Lbl>),
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Neg,
    Not,
    Ceq,
    Cgt,
    Clt,
    LdStr(String),
    Box(TypeSig),
    UnboxAny(TypeSig),
    CastClass(TypeSig),
    IsInst(TypeSig),
    NewArr(TypeSig),
    LdLen,
    LdElemRef,
    StElemRef,
    Throw,
}

/// Condition under which a branch is taken
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum BranchCondition {
    Always,
    False,
    True,
    Eq,
    Ge,
    Gt,
    Le,
    Lt,
    NeUn,
}

impl BranchCondition {
    /// All conditions, in opcode order
    pub const ALL: [BranchCondition; 9] = [
        BranchCondition::Always,
        BranchCondition::False,
        BranchCondition::True,
        BranchCondition::Eq,
        BranchCondition::Ge,
        BranchCondition::Gt,
        BranchCondition::Le,
        BranchCondition::Lt,
        BranchCondition::NeUn,
    ];

    /// Position in the (contiguous) block of branch opcodes
    pub fn opcode_index(self) -> u8 {
        match self {
            BranchCondition::Always => 0,
            BranchCondition::False => 1,
            BranchCondition::True => 2,
            BranchCondition::Eq => 3,
            BranchCondition::Ge => 4,
            BranchCondition::Gt => 5,
            BranchCondition::Le => 6,
            BranchCondition::Lt => 7,
            BranchCondition::NeUn => 8,
        }
    }

    /// Number of stack operands the branch consumes
    pub fn operands(self) -> usize {
        match self {
            BranchCondition::Always => 0,
            BranchCondition::False | BranchCondition::True => 1,
            _ => 2,
        }
    }

    fn mnemonic(self) -> &'static str {
        match self {
            BranchCondition::Always => "br",
            BranchCondition::False => "brfalse",
            BranchCondition::True => "brtrue",
            BranchCondition::Eq => "beq",
            BranchCondition::Ge => "bge",
            BranchCondition::Gt => "bgt",
            BranchCondition::Le => "ble",
            BranchCondition::Lt => "blt",
            BranchCondition::NeUn => "bne.un",
        }
    }
}

/// How an instruction changes the height of the evaluation stack
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct StackEffect {
    pub pops: usize,
    pub pushes: usize,
}

impl StackEffect {
    const fn new(pops: usize, pushes: usize) -> StackEffect {
        StackEffect { pops, pushes }
    }

    fn call(method: &MethodRef, is_constructor: bool) -> StackEffect {
        let pops = if is_constructor {
            method.signature.parameters.len()
        } else {
            method.signature.argument_slots()
        };
        let pushes = if is_constructor || !method.signature.return_type.is_void() {
            1
        } else {
            0
        };
        StackEffect { pops, pushes }
    }
}

impl<Lbl> Instruction<Lbl> {
    /// Convert the branch targets of the instruction, leaving everything else untouched
    pub fn map_labels<Lbl2, E>(
        &self,
        mut map_label: impl FnMut(&Lbl) -> Result<Lbl2, E>,
    ) -> Result<Instruction<Lbl2>, E> {
        use Instruction::*;
        Ok(match self {
            Nop => Nop,
            LdArg(idx) => LdArg(*idx),
            StArg(idx) => StArg(*idx),
            LdLoc(idx) => LdLoc(*idx),
            StLoc(idx) => StLoc(*idx),
            LdNull => LdNull,
            LdcI4(value) => LdcI4(*value),
            LdcI8(value) => LdcI8(*value),
            LdcR4(value) => LdcR4(*value),
            LdcR8(value) => LdcR8(*value),
            Dup => Dup,
            Pop => Pop,
            Call(method) => Call(method.clone()),
            CallVirt(method) => CallVirt(method.clone()),
            NewObj(method) => NewObj(method.clone()),
            Ret => Ret,
            Branch(cond, lbl) => Branch(*cond, map_label(lbl)?),
            ShortBranch(cond, lbl) => ShortBranch(*cond, map_label(lbl)?),
            Switch(lbls) => Switch(
                lbls.iter()
                    .map(|lbl| map_label(lbl))
                    .collect::<Result<_, E>>()?,
            ),
            Add => Add,
            Sub => Sub,
            Mul => Mul,
            Div => Div,
            Rem => Rem,
            And => And,
            Or => Or,
            Xor => Xor,
            Neg => Neg,
            Not => Not,
            Ceq => Ceq,
            Cgt => Cgt,
            Clt => Clt,
            LdStr(string) => LdStr(string.clone()),
            Box(ty) => Box(ty.clone()),
            UnboxAny(ty) => UnboxAny(ty.clone()),
            CastClass(ty) => CastClass(ty.clone()),
            IsInst(ty) => IsInst(ty.clone()),
            NewArr(ty) => NewArr(ty.clone()),
            LdLen => LdLen,
            LdElemRef => LdElemRef,
            StElemRef => StElemRef,
            Throw => Throw,
        })
    }

    /// Targets this instruction may jump to (not counting falling through)
    pub fn branch_targets(&self) -> &[Lbl] {
        match self {
            Instruction::Branch(_, lbl) | Instruction::ShortBranch(_, lbl) => {
                std::slice::from_ref(lbl)
            }
            Instruction::Switch(lbls) => lbls,
            _ => &[],
        }
    }

    /// Can control reach the next instruction in the layout?
    pub fn falls_through(&self) -> bool {
        !matches!(
            self,
            Instruction::Ret
                | Instruction::Throw
                | Instruction::Branch(BranchCondition::Always, _)
                | Instruction::ShortBranch(BranchCondition::Always, _)
        )
    }

    /// Effect on the evaluation stack
    ///
    /// Note: `ret` is modelled as consuming nothing since whether it pops a value depends on the
    /// enclosing method's return type.
    pub fn stack_effect(&self) -> StackEffect {
        use Instruction::*;
        match self {
            Nop | Ret => StackEffect::new(0, 0),
            LdArg(_) | LdLoc(_) | LdNull | LdcI4(_) | LdcI8(_) | LdcR4(_) | LdcR8(_) | LdStr(_) => {
                StackEffect::new(0, 1)
            }
            StArg(_) | StLoc(_) | Pop | Throw => StackEffect::new(1, 0),
            Dup => StackEffect::new(1, 2),
            Call(method) | CallVirt(method) => StackEffect::call(method, false),
            NewObj(method) => StackEffect::call(method, true),
            Branch(cond, _) | ShortBranch(cond, _) => StackEffect::new(cond.operands(), 0),
            Switch(_) => StackEffect::new(1, 0),
            Add | Sub | Mul | Div | Rem | And | Or | Xor | Ceq | Cgt | Clt => {
                StackEffect::new(2, 1)
            }
            Neg | Not | Box(_) | UnboxAny(_) | CastClass(_) | IsInst(_) | NewArr(_) | LdLen => {
                StackEffect::new(1, 1)
            }
            LdElemRef => StackEffect::new(2, 1),
            StElemRef => StackEffect::new(3, 0),
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        use Instruction::*;
        match self {
            Nop => "nop",
            LdArg(_) => "ldarg",
            StArg(_) => "starg",
            LdLoc(_) => "ldloc",
            StLoc(_) => "stloc",
            LdNull => "ldnull",
            LdcI4(_) => "ldc.i4",
            LdcI8(_) => "ldc.i8",
            LdcR4(_) => "ldc.r4",
            LdcR8(_) => "ldc.r8",
            Dup => "dup",
            Pop => "pop",
            Call(_) => "call",
            CallVirt(_) => "callvirt",
            NewObj(_) => "newobj",
            Ret => "ret",
            Branch(cond, _) => cond.mnemonic(),
            ShortBranch(BranchCondition::Always, _) => "br.s",
            ShortBranch(BranchCondition::False, _) => "brfalse.s",
            ShortBranch(BranchCondition::True, _) => "brtrue.s",
            ShortBranch(BranchCondition::Eq, _) => "beq.s",
            ShortBranch(BranchCondition::Ge, _) => "bge.s",
            ShortBranch(BranchCondition::Gt, _) => "bgt.s",
            ShortBranch(BranchCondition::Le, _) => "ble.s",
            ShortBranch(BranchCondition::Lt, _) => "blt.s",
            ShortBranch(BranchCondition::NeUn, _) => "bne.un.s",
            Switch(_) => "switch",
            Add => "add",
            Sub => "sub",
            Mul => "mul",
            Div => "div",
            Rem => "rem",
            And => "and",
            Or => "or",
            Xor => "xor",
            Neg => "neg",
            Not => "not",
            Ceq => "ceq",
            Cgt => "cgt",
            Clt => "clt",
            LdStr(_) => "ldstr",
            Box(_) => "box",
            UnboxAny(_) => "unbox.any",
            CastClass(_) => "castclass",
            IsInst(_) => "isinst",
            NewArr(_) => "newarr",
            LdLen => "ldlen",
            LdElemRef => "ldelem.ref",
            StElemRef => "stelem.ref",
            Throw => "throw",
        }
    }
}

impl<Lbl> Width for Instruction<Lbl> {
    fn width(&self) -> usize {
        use Instruction::*;
        match self {
            LdArg(0..=3) | LdLoc(0..=3) | StLoc(0..=3) => 1,
            LdArg(0..=255) | StArg(0..=255) | LdLoc(0..=255) | StLoc(0..=255) => 2,
            LdArg(_) | StArg(_) | LdLoc(_) | StLoc(_) => 4,

            LdcI4(-1..=8) => 1,
            LdcI4(-128..=127) => 2,
            LdcI4(_) => 5,
            LdcI8(_) | LdcR8(_) => 9,
            LdcR4(_) => 5,

            Call(_) | CallVirt(_) | NewObj(_) => 5,
            LdStr(_) | Box(_) | UnboxAny(_) | CastClass(_) | IsInst(_) | NewArr(_) => 5,

            Branch(_, _) => 5,
            ShortBranch(_, _) => 2,
            Switch(targets) => 5 + 4 * targets.len(),

            Ceq | Cgt | Clt => 2,

            Nop | LdNull | Dup | Pop | Ret | Add | Sub | Mul | Div | Rem | And | Or | Xor | Neg
            | Not | LdLen | LdElemRef | StElemRef | Throw => 1,
        }
    }
}

impl<Lbl: fmt::Debug> fmt::Display for Instruction<Lbl> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Instruction::*;
        f.write_str(self.mnemonic())?;
        match self {
            LdArg(idx) | StArg(idx) | LdLoc(idx) | StLoc(idx) => write!(f, " {}", idx),
            LdcI4(value) => write!(f, " {}", value),
            LdcI8(value) => write!(f, " {}", value),
            LdcR4(value) => write!(f, " {}", value),
            LdcR8(value) => write!(f, " {}", value),
            Call(method) | CallVirt(method) | NewObj(method) => write!(f, " {}", method.render()),
            Branch(_, lbl) | ShortBranch(_, lbl) => write!(f, " {:?}", lbl),
            Switch(lbls) => write!(f, " {:?}", lbls),
            LdStr(string) => write!(f, " {:?}", string),
            Box(ty) | UnboxAny(ty) | CastClass(ty) | IsInst(ty) | NewArr(ty) => {
                write!(f, " {}", ty.render())
            }
            _ => Ok(()),
        }
    }
}
