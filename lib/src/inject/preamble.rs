use super::PatchRegistry;
use crate::il::code::{BranchCondition, InsnId, Instruction};
use crate::il::{Error, MethodDef, TypeDef, TypeSig};
use log::trace;

/// What the preamble needs to know about the method it is prepended to
#[derive(Clone, Debug, PartialEq)]
pub struct MethodTarget {
    /// Key under which the registry knows the declaring type (its simple name)
    pub type_name: String,
    pub method_name: String,
    pub parameters: Vec<TypeSig>,
    pub is_static: bool,
    pub return_type: TypeSig,
}

impl MethodTarget {
    pub fn new(type_def: &TypeDef, method: &MethodDef) -> MethodTarget {
        MethodTarget {
            type_name: type_def.name.clone(),
            method_name: method.name.clone(),
            parameters: method.parameters.iter().map(|p| p.ty.clone()).collect(),
            is_static: method.is_static(),
            return_type: method.return_type.clone(),
        }
    }

    /// Argument slot holding parameter `index` (slot 0 is `this` on instance methods)
    ///
    /// `None` if the slot is past the last one `ldarg` can address.
    pub fn argument_slot(&self, index: usize) -> Option<u16> {
        let slot = if self.is_static {
            Some(index)
        } else {
            index.checked_add(1)
        };
        slot.and_then(|slot| u16::try_from(slot).ok())
    }
}

/// Instructions to splice in front of a method body
#[derive(Clone, Debug)]
pub struct Preamble {
    /// In execution order
    pub instructions: Vec<Instruction<InsnId>>,

    /// Where execution continues when there is no patch (the original first instruction)
    pub resume_at: InsnId,

    /// Deepest evaluation stack reached while running the preamble
    pub max_stack: u16,
}

/// Build the patch check and dispatch sequence for `target`
///
/// ```text
///     ldstr <type>; ldstr <method>; call HasPatch; brfalse <original first>
///     ldstr <type>; ldstr <method>; ldc.i4 <n>; newarr object
///     { dup; ldc.i4 <i>; ldarg <slot i>; [box <T_i>]; stelem.ref }   for each parameter
///     call CallPatch
///     unbox.any <return type>     (or `pop` for void methods)
///     ret
/// ```
pub fn synthesize(
    target: &MethodTarget,
    registry: &PatchRegistry,
    original_first: InsnId,
) -> Result<Preamble, Error> {
    let mut instructions: Vec<Instruction<InsnId>> = vec![];

    // if (!HasPatch(type, method)) goto original;
    instructions.push(Instruction::LdStr(target.type_name.clone()));
    instructions.push(Instruction::LdStr(target.method_name.clone()));
    instructions.push(Instruction::Call(registry.has_patch.clone()));
    instructions.push(Instruction::Branch(BranchCondition::False, original_first));

    // CallPatch(type, method, new object[] { args... })
    instructions.push(Instruction::LdStr(target.type_name.clone()));
    instructions.push(Instruction::LdStr(target.method_name.clone()));
    instructions.push(Instruction::LdcI4(target.parameters.len() as i32));
    instructions.push(Instruction::NewArr(TypeSig::Object));
    for (index, parameter) in target.parameters.iter().enumerate() {
        let slot = target
            .argument_slot(index)
            .ok_or(Error::TooManyParameters(target.parameters.len()))?;
        instructions.push(Instruction::Dup);
        instructions.push(Instruction::LdcI4(index as i32));
        instructions.push(Instruction::LdArg(slot));
        if parameter.is_value_type() {
            instructions.push(Instruction::Box(parameter.clone()));
        }
        instructions.push(Instruction::StElemRef);
    }
    instructions.push(Instruction::Call(registry.call_patch.clone()));

    if !target.return_type.is_void() {
        instructions.push(Instruction::UnboxAny(target.return_type.clone()));
    } else if registry.call_patch_returns_value() {
        instructions.push(Instruction::Pop);
    }
    instructions.push(Instruction::Ret);

    let max_stack = max_stack_depth(&instructions);
    trace!(
        "Preamble for {}::{} (max stack {}): {:?}",
        target.type_name,
        target.method_name,
        max_stack,
        instructions
            .iter()
            .map(|insn| insn.to_string())
            .collect::<Vec<_>>()
    );

    Ok(Preamble {
        instructions,
        resume_at: original_first,
        max_stack,
    })
}

/// Stack depth reached by straight-line code starting on an empty stack
fn max_stack_depth<Lbl>(instructions: &[Instruction<Lbl>]) -> u16 {
    let mut depth: usize = 0;
    let mut max_depth: usize = 0;
    for instruction in instructions {
        let effect = instruction.stack_effect();
        depth = depth.saturating_sub(effect.pops) + effect.pushes;
        max_depth = max_depth.max(depth);
    }
    u16::try_from(max_depth).unwrap_or(u16::MAX)
}
