use crate::il::code::{Body, BranchCondition, InsnId, Instruction};
use crate::il::{Deserialize, Error, MethodRef, Serialize, Token, TokenPool, TokenTable, TypeSig};
use crate::util::{Offset, OffsetResult, OffsetVec, Width};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

const SHORT_BRANCH_BASE: u8 = 0x2b;
const LONG_BRANCH_BASE: u8 = 0x38;
const TWO_BYTE_PREFIX: u8 = 0xfe;

impl Body {
    /// Encode the instructions of the body into CIL bytes
    ///
    /// Branch targets become displacements from the end of the branch instruction, and metadata
    /// operands become tokens from `pool`. Offsets must be current.
    pub fn encode(&self, pool: &mut TokenPool) -> Result<Vec<u8>, Error> {
        if !self.offsets_are_current() {
            return Err(Error::StaleOffsets);
        }
        let code_size = self.code_size();
        if code_size.0 > i32::MAX as usize {
            return Err(Error::CodeTooLarge(code_size));
        }

        let mut code: Vec<u8> = Vec::with_capacity(code_size.0);
        for (_, at, insn) in self.iter() {
            let next = Offset(at.0 + insn.width());
            let relative = insn.map_labels(|target: &InsnId| {
                let target_offset = self
                    .offset(*target)
                    .ok_or(Error::DanglingBranchTarget(*target))?;
                Ok::<isize, Error>(target_offset - next)
            })?;
            encode_instruction(&relative, at, pool, &mut code)?;
        }
        Ok(code)
    }
}

fn encode_instruction<W: WriteBytesExt>(
    insn: &Instruction<isize>,
    at: Offset,
    pool: &mut TokenPool,
    writer: &mut W,
) -> Result<(), Error> {
    /* Loads and stores follow the same pattern:
     *
     *   - short form (0-3) have special bytes (except `starg`, which has none)
     *   - `.s` form (0-255) use one opcode byte plus a byte operand
     *   - long form use the two byte opcode plus a `u16` operand
     */
    fn load_or_store<W: WriteBytesExt>(
        idx: u16,
        short_form_start: Option<u8>,
        byte_form: u8,
        long_form: u8,
        writer: &mut W,
    ) -> std::io::Result<()> {
        match (u8::try_from(idx), short_form_start) {
            (Ok(n @ 0..=3), Some(start)) => (start + n).serialize(writer),
            (Ok(n), _) => {
                byte_form.serialize(writer)?;
                n.serialize(writer)
            }
            (Err(_), _) => {
                TWO_BYTE_PREFIX.serialize(writer)?;
                long_form.serialize(writer)?;
                idx.serialize(writer)
            }
        }
    }

    fn with_token<W: WriteBytesExt>(opcode: u8, token: Token, writer: &mut W) -> std::io::Result<()> {
        opcode.serialize(writer)?;
        token.serialize(writer)
    }

    fn displacement(at: Offset, displacement: isize) -> Result<i32, Error> {
        i32::try_from(displacement).map_err(|_| Error::BranchOutOfRange { from: at, displacement })
    }

    match insn {
        Instruction::Nop => 0x00u8.serialize(writer)?,
        Instruction::LdArg(idx) => load_or_store(*idx, Some(0x02), 0x0e, 0x09, writer)?,
        Instruction::StArg(idx) => load_or_store(*idx, None, 0x10, 0x0b, writer)?,
        Instruction::LdLoc(idx) => load_or_store(*idx, Some(0x06), 0x11, 0x0c, writer)?,
        Instruction::StLoc(idx) => load_or_store(*idx, Some(0x0a), 0x13, 0x0e, writer)?,
        Instruction::LdNull => 0x14u8.serialize(writer)?,
        Instruction::LdcI4(value) => match *value {
            -1 => 0x15u8.serialize(writer)?,
            n @ 0..=8 => (0x16u8 + n as u8).serialize(writer)?,
            n @ -128..=127 => {
                0x1fu8.serialize(writer)?;
                (n as i8).serialize(writer)?;
            }
            n => {
                0x20u8.serialize(writer)?;
                n.serialize(writer)?;
            }
        },
        Instruction::LdcI8(value) => {
            0x21u8.serialize(writer)?;
            value.serialize(writer)?;
        }
        Instruction::LdcR4(value) => {
            0x22u8.serialize(writer)?;
            value.serialize(writer)?;
        }
        Instruction::LdcR8(value) => {
            0x23u8.serialize(writer)?;
            value.serialize(writer)?;
        }
        Instruction::Dup => 0x25u8.serialize(writer)?,
        Instruction::Pop => 0x26u8.serialize(writer)?,
        Instruction::Call(method) => with_token(0x28, pool.get_method(method), writer)?,
        Instruction::Ret => 0x2au8.serialize(writer)?,
        Instruction::ShortBranch(cond, disp) => {
            let short = i8::try_from(*disp).map_err(|_| Error::BranchOutOfRange {
                from: at,
                displacement: *disp,
            })?;
            (SHORT_BRANCH_BASE + cond.opcode_index()).serialize(writer)?;
            short.serialize(writer)?;
        }
        Instruction::Branch(cond, disp) => {
            (LONG_BRANCH_BASE + cond.opcode_index()).serialize(writer)?;
            displacement(at, *disp)?.serialize(writer)?;
        }
        Instruction::Switch(disps) => {
            0x45u8.serialize(writer)?;
            (disps.len() as u32).serialize(writer)?;
            for disp in disps {
                displacement(at, *disp)?.serialize(writer)?;
            }
        }
        Instruction::Add => 0x58u8.serialize(writer)?,
        Instruction::Sub => 0x59u8.serialize(writer)?,
        Instruction::Mul => 0x5au8.serialize(writer)?,
        Instruction::Div => 0x5bu8.serialize(writer)?,
        Instruction::Rem => 0x5du8.serialize(writer)?,
        Instruction::And => 0x5fu8.serialize(writer)?,
        Instruction::Or => 0x60u8.serialize(writer)?,
        Instruction::Xor => 0x61u8.serialize(writer)?,
        Instruction::Neg => 0x65u8.serialize(writer)?,
        Instruction::Not => 0x66u8.serialize(writer)?,
        Instruction::CallVirt(method) => with_token(0x6f, pool.get_method(method), writer)?,
        Instruction::LdStr(string) => with_token(0x72, pool.get_string(string), writer)?,
        Instruction::NewObj(method) => with_token(0x73, pool.get_method(method), writer)?,
        Instruction::CastClass(ty) => with_token(0x74, pool.get_type(ty), writer)?,
        Instruction::IsInst(ty) => with_token(0x75, pool.get_type(ty), writer)?,
        Instruction::Throw => 0x7au8.serialize(writer)?,
        Instruction::Box(ty) => with_token(0x8c, pool.get_type(ty), writer)?,
        Instruction::NewArr(ty) => with_token(0x8d, pool.get_type(ty), writer)?,
        Instruction::LdLen => 0x8eu8.serialize(writer)?,
        Instruction::LdElemRef => 0x9au8.serialize(writer)?,
        Instruction::StElemRef => 0xa2u8.serialize(writer)?,
        Instruction::UnboxAny(ty) => with_token(0xa5, pool.get_type(ty), writer)?,
        Instruction::Ceq => [TWO_BYTE_PREFIX, 0x01].iter().try_for_each(|b| b.serialize(writer))?,
        Instruction::Cgt => [TWO_BYTE_PREFIX, 0x02].iter().try_for_each(|b| b.serialize(writer))?,
        Instruction::Clt => [TWO_BYTE_PREFIX, 0x04].iter().try_for_each(|b| b.serialize(writer))?,
    }
    Ok(())
}

/// Instruction as read from the code bytes, before branch targets are resolved
///
/// The width is the one found in the input, which may be longer than the canonical width of the
/// instruction (eg. `ldarg.s 0` instead of `ldarg.0`).
#[derive(Clone, Debug)]
struct RawInstruction {
    /// Branch targets are absolute, but may point anywhere
    instruction: Instruction<isize>,
    width: usize,
}

impl Width for RawInstruction {
    fn width(&self) -> usize {
        self.width
    }
}

/// Result of decoding method code
pub struct DecodedCode {
    pub body: Body,

    /// Instructions, at the offsets they had in the input
    original: OffsetVec<RawInstruction>,
}

impl DecodedCode {
    /// Instruction that started at some offset of the input code
    pub fn instruction_at(&self, offset: Offset) -> Option<InsnId> {
        self.original
            .get_offset(offset)
            .index()
            .and_then(|idx| self.body.id_at(idx))
    }
}

/// Decode CIL bytes into a body (with freshly recomputed offsets)
///
/// Every branch target must be the start of an instruction in the same code.
pub fn decode_code(code: &[u8], tokens: &TokenTable) -> Result<DecodedCode, Error> {
    let mut original: OffsetVec<RawInstruction> = OffsetVec::new();
    let mut reader: &[u8] = code;
    while !reader.is_empty() {
        let at = original.offset_len();
        let before = reader.len();
        let instruction = decode_instruction(&mut reader, at, tokens)?;
        let width = before - reader.len();
        original.push(RawInstruction {
            instruction: instruction.map_labels(|disp: &isize| {
                Ok::<isize, Error>((at.0 + width) as isize + disp)
            })?,
            width,
        });
    }

    let code_len = original.offset_len();
    let mut instructions: Vec<Instruction<usize>> = Vec::with_capacity(original.len());
    for (from, _, raw) in original.iter() {
        instructions.push(raw.instruction.map_labels(|target: &isize| {
            if *target < 0 || *target as usize >= code_len.0 {
                return Err(Error::BranchOutOfBounds {
                    from,
                    target: *target,
                });
            }
            match original.get_offset(Offset(*target as usize)) {
                OffsetResult::Ok(idx, _) => Ok(idx),
                OffsetResult::InvalidOffset(_) | OffsetResult::TooLarge => {
                    Err(Error::BranchIntoInstruction {
                        from,
                        target: Offset(*target as usize),
                    })
                }
            }
        })?);
    }

    Ok(DecodedCode {
        body: Body::from_instructions(instructions)?,
        original,
    })
}

/// Decode one instruction, leaving branch targets as displacements
fn decode_instruction(
    reader: &mut &[u8],
    at: Offset,
    tokens: &TokenTable,
) -> Result<Instruction<isize>, Error> {
    fn method(reader: &mut &[u8], tokens: &TokenTable) -> Result<MethodRef, Error> {
        Ok(tokens.method(Token::deserialize(reader)?)?.clone())
    }

    fn type_sig(reader: &mut &[u8], tokens: &TokenTable) -> Result<TypeSig, Error> {
        Ok(tokens.type_sig(Token::deserialize(reader)?)?.clone())
    }

    let opcode = u8::deserialize(reader)?;
    Ok(match opcode {
        0x00 => Instruction::Nop,
        0x02..=0x05 => Instruction::LdArg((opcode - 0x02) as u16),
        0x06..=0x09 => Instruction::LdLoc((opcode - 0x06) as u16),
        0x0a..=0x0d => Instruction::StLoc((opcode - 0x0a) as u16),
        0x0e => Instruction::LdArg(u8::deserialize(reader)? as u16),
        0x10 => Instruction::StArg(u8::deserialize(reader)? as u16),
        0x11 => Instruction::LdLoc(u8::deserialize(reader)? as u16),
        0x13 => Instruction::StLoc(u8::deserialize(reader)? as u16),
        0x14 => Instruction::LdNull,
        0x15 => Instruction::LdcI4(-1),
        0x16..=0x1e => Instruction::LdcI4((opcode - 0x16) as i32),
        0x1f => Instruction::LdcI4(i8::deserialize(reader)? as i32),
        0x20 => Instruction::LdcI4(i32::deserialize(reader)?),
        0x21 => Instruction::LdcI8(i64::deserialize(reader)?),
        0x22 => Instruction::LdcR4(f32::deserialize(reader)?),
        0x23 => Instruction::LdcR8(f64::deserialize(reader)?),
        0x25 => Instruction::Dup,
        0x26 => Instruction::Pop,
        0x28 => Instruction::Call(method(reader, tokens)?),
        0x2a => Instruction::Ret,
        0x2b..=0x33 => Instruction::ShortBranch(
            BranchCondition::ALL[(opcode - SHORT_BRANCH_BASE) as usize],
            i8::deserialize(reader)? as isize,
        ),
        0x38..=0x40 => Instruction::Branch(
            BranchCondition::ALL[(opcode - LONG_BRANCH_BASE) as usize],
            i32::deserialize(reader)? as isize,
        ),
        0x45 => {
            let count = u32::deserialize(reader)?;
            let mut disps = Vec::new();
            for _ in 0..count {
                disps.push(i32::deserialize(reader)? as isize);
            }
            // Switch displacements are relative to the end of the whole instruction
            Instruction::Switch(disps)
        }
        0x58 => Instruction::Add,
        0x59 => Instruction::Sub,
        0x5a => Instruction::Mul,
        0x5b => Instruction::Div,
        0x5d => Instruction::Rem,
        0x5f => Instruction::And,
        0x60 => Instruction::Or,
        0x61 => Instruction::Xor,
        0x65 => Instruction::Neg,
        0x66 => Instruction::Not,
        0x6f => Instruction::CallVirt(method(reader, tokens)?),
        0x72 => Instruction::LdStr(tokens.string(Token::deserialize(reader)?)?.to_owned()),
        0x73 => Instruction::NewObj(method(reader, tokens)?),
        0x74 => Instruction::CastClass(type_sig(reader, tokens)?),
        0x75 => Instruction::IsInst(type_sig(reader, tokens)?),
        0x7a => Instruction::Throw,
        0x8c => Instruction::Box(type_sig(reader, tokens)?),
        0x8d => Instruction::NewArr(type_sig(reader, tokens)?),
        0x8e => Instruction::LdLen,
        0x9a => Instruction::LdElemRef,
        0xa2 => Instruction::StElemRef,
        0xa5 => Instruction::UnboxAny(type_sig(reader, tokens)?),
        TWO_BYTE_PREFIX => {
            let second = u8::deserialize(reader)?;
            match second {
                0x01 => Instruction::Ceq,
                0x02 => Instruction::Cgt,
                0x04 => Instruction::Clt,
                0x09 => Instruction::LdArg(reader.read_u16::<LittleEndian>()?),
                0x0b => Instruction::StArg(reader.read_u16::<LittleEndian>()?),
                0x0c => Instruction::LdLoc(reader.read_u16::<LittleEndian>()?),
                0x0e => Instruction::StLoc(reader.read_u16::<LittleEndian>()?),
                _ => {
                    return Err(Error::UnknownOpcode {
                        offset: at,
                        opcode: u16::from_be_bytes([TWO_BYTE_PREFIX, second]),
                    })
                }
            }
        }
        _ => {
            return Err(Error::UnknownOpcode {
                offset: at,
                opcode: opcode as u16,
            })
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::il::MethodSig;

    fn has_patch() -> MethodRef {
        MethodRef {
            declaring_type: String::from("Hotfix.PatchRegistry"),
            name: String::from("HasPatch"),
            signature: MethodSig {
                has_this: false,
                parameters: vec![TypeSig::String, TypeSig::String],
                return_type: TypeSig::Boolean,
            },
        }
    }

    fn encode(body: &Body) -> (Vec<u8>, TokenTable) {
        let mut pool = TokenPool::new();
        let code = body.encode(&mut pool).unwrap();
        (code, pool.into_table())
    }

    #[test]
    fn branches_encode_relative_to_their_end() {
        let body = Body::from_instructions(vec![
            Instruction::LdArg(0),
            Instruction::ShortBranch(BranchCondition::False, 4),
            Instruction::LdcI4(1),
            Instruction::Ret,
            Instruction::LdcI4(2),
            Instruction::Ret,
        ])
        .unwrap();
        let (code, _) = encode(&body);
        assert_eq!(code, vec![0x02, 0x2c, 0x02, 0x17, 0x2a, 0x18, 0x2a]);
    }

    #[test]
    fn tokens_and_prefixed_opcodes() {
        let body = Body::from_instructions(vec![
            Instruction::LdStr(String::from("Game.Player")),
            Instruction::LdStr(String::from("Jump")),
            Instruction::Call(has_patch()),
            Instruction::LdArg(300),
            Instruction::Ceq,
            Instruction::Ret,
        ])
        .unwrap();
        let (code, table) = encode(&body);
        assert_eq!(
            code,
            vec![
                0x72, 0x01, 0x00, 0x00, 0x70, // ldstr "Game.Player"
                0x72, 0x02, 0x00, 0x00, 0x70, // ldstr "Jump"
                0x28, 0x01, 0x00, 0x00, 0x0a, // call HasPatch
                0xfe, 0x09, 0x2c, 0x01, // ldarg 300
                0xfe, 0x01, // ceq
                0x2a, // ret
            ]
        );
        assert_eq!(table.strings, vec!["Game.Player", "Jump"]);
        assert_eq!(table.methods, vec![has_patch()]);
    }

    #[test]
    fn decoding_canonicalizes_and_resolves_targets() {
        let mut pool = TokenPool::new();
        pool.get_type(&TypeSig::Object);
        let table = pool.into_table();

        // ldarg.s 0; br 6 (long form, to `ret`); newarr object; ret
        let code: Vec<u8> = vec![
            0x0e, 0x00, // ldarg.s 0
            0x38, 0x05, 0x00, 0x00, 0x00, // br +5
            0x8d, 0x01, 0x00, 0x00, 0x1b, // newarr object
            0x2a, // ret
        ];
        let decoded = decode_code(&code, &table).unwrap();
        let body = &decoded.body;
        assert_eq!(body.len(), 4);

        let ret = body.id_at(3).unwrap();
        let branch = body.instruction(body.id_at(1).unwrap()).unwrap();
        assert_eq!(branch, &Instruction::Branch(BranchCondition::Always, ret));
        assert_eq!(
            body.instruction(body.id_at(0).unwrap()),
            Some(&Instruction::LdArg(0))
        );

        // Original offsets still resolve, but the body was re-laid out with `ldarg.0`
        assert_eq!(decoded.instruction_at(Offset(12)), Some(ret));
        assert_eq!(decoded.instruction_at(Offset(1)), None);
        assert_eq!(body.offset(ret), Some(Offset(11)));
        assert!(body.offsets_are_current());
    }

    #[test]
    fn bad_branches_are_rejected() {
        let table = TokenTable::default();

        // br.s into the middle of `ldc.i4.s`
        let into = vec![0x2b, 0x01, 0x1f, 0x07, 0x2a];
        assert!(matches!(
            decode_code(&into, &table),
            Err(Error::BranchIntoInstruction { .. })
        ));

        // br.s past the end
        let past = vec![0x2b, 0x05, 0x2a];
        assert!(matches!(
            decode_code(&past, &table),
            Err(Error::BranchOutOfBounds { .. })
        ));

        assert!(matches!(
            decode_code(&[0xfe, 0x7f], &table),
            Err(Error::UnknownOpcode { opcode: 0xfe7f, .. })
        ));
        assert!(matches!(
            decode_code(&[0x20, 0x01], &table),
            Err(Error::UnexpectedEof)
        ));
    }

    #[test]
    fn short_branch_out_of_range() {
        let mut instructions = vec![Instruction::ShortBranch(BranchCondition::Always, 1)];
        instructions.extend((0..200).map(|_| Instruction::Nop));
        instructions.push(Instruction::Ret);
        let mut body = Body::from_instructions(instructions).unwrap();
        // Target the `ret` instead, 200 bytes away
        let ret = body.id_at(201).unwrap();
        let entry = body.first().unwrap();
        body.insert_before(entry, Instruction::ShortBranch(BranchCondition::Always, ret))
            .unwrap();
        body.recompute_offsets();

        let mut pool = TokenPool::new();
        assert!(matches!(
            body.encode(&mut pool),
            Err(Error::BranchOutOfRange {
                from: Offset(0),
                displacement: 202,
            })
        ));
    }

    #[test]
    fn stale_offsets_are_refused() {
        let mut body = Body::from_instructions(vec![Instruction::Ret]).unwrap();
        let entry = body.first().unwrap();
        body.insert_before(entry, Instruction::Nop).unwrap();
        let mut pool = TokenPool::new();
        assert!(matches!(body.encode(&mut pool), Err(Error::StaleOffsets)));
    }
}
