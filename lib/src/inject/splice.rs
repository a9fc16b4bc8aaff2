use super::Preamble;
use crate::il::code::{Body, InsnId};
use crate::il::Error;

/// Where a preamble landed in a body
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Spliced {
    /// New entry point of the method (first preamble instruction)
    pub entry: InsnId,

    /// Entry point before splicing, now the target of the preamble's `brfalse`
    pub original_first: InsnId,

    /// Number of instructions inserted
    pub inserted: usize,
}

/// Insert a preamble in front of the first instruction of a body
///
/// Existing instructions are neither moved relative to each other nor modified. Offsets are left
/// stale: recompute them once all splicing on the body is done.
pub fn splice_preamble(body: &mut Body, preamble: Preamble) -> Result<Spliced, Error> {
    let original_first = body.first().ok_or(Error::EmptyBody)?;
    if preamble.resume_at != original_first {
        return Err(Error::UnknownInstruction(preamble.resume_at));
    }

    let inserted = preamble.instructions.len();
    let mut instructions = preamble.instructions.into_iter();
    let entry = match instructions.next() {
        Some(instruction) => body.insert_before(original_first, instruction)?,
        None => {
            return Ok(Spliced {
                entry: original_first,
                original_first,
                inserted: 0,
            })
        }
    };

    let mut current = entry;
    for instruction in instructions {
        current = body.insert_after(current, instruction)?;
    }

    body.max_stack = body.max_stack.max(preamble.max_stack);
    Ok(Spliced {
        entry,
        original_first,
        inserted,
    })
}
