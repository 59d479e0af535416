use std::collections::BTreeMap;

use bitcoin::blockdata::opcodes::all::{OP_ENDIF, OP_IF};
use bitcoin::blockdata::script::Instruction;
use bitcoin::{Script, ScriptBuf, Witness};

use crate::inscription::{Inscription, TransactionInscription};
use crate::tag::Tag;

const PROTOCOL_ID: &[u8] = b"ord";

#[derive(Debug, thiserror::Error)]
pub enum InscriptionError {
    #[error("witness has no items")]
    EmptyWitness,
    #[error("witness is a key-path spend, no script to parse")]
    KeyPathSpend,
    #[error("unrecognized even field in envelope")]
    UnrecognizedEvenField,
    #[error("duplicate tag in envelope")]
    DuplicateTag,
    #[error("envelope instruction sequence did not match the expected grammar")]
    InvalidInstruction,
    #[error("malformed script: {0}")]
    Script(#[from] bitcoin::script::Error),
}

/// Selects the witness item carrying the candidate tapscript (§3.1 `Witness`): `witness[-2]`
/// if the final item is a `0x50`-prefixed annex, else `witness[-1]`.
pub fn candidate_script(witness: &Witness) -> Result<ScriptBuf, InscriptionError> {
    if witness.is_empty() {
        return Err(InscriptionError::EmptyWitness);
    }
    let has_annex = witness
        .last()
        .map(|item| item.first() == Some(&0x50))
        .unwrap_or(false);
    let needed_len = if has_annex { 3 } else { 2 };
    if witness.len() < needed_len {
        return Err(InscriptionError::KeyPathSpend);
    }
    let script_index = witness.len() - if has_annex { 2 } else { 1 };
    let script_bytes = witness
        .nth(script_index)
        .ok_or(InscriptionError::KeyPathSpend)?;
    Ok(ScriptBuf::from(script_bytes.to_vec()))
}

/// Parses every envelope found in `script`, in order. A malformed envelope is dropped silently
/// (the caller logs it at debug level per §7); scanning resumes after it looking for the next
/// envelope.
pub fn parse_script(script: &Script) -> Vec<Inscription> {
    let mut inscriptions = Vec::new();
    let mut instructions = script.instructions();

    while scan_to_envelope_start(&mut instructions) {
        if let Ok(inscription) = parse_one_envelope(&mut instructions) {
            inscriptions.push(inscription);
        }
    }

    inscriptions
}

type Instructions<'a> = bitcoin::blockdata::script::Instructions<'a>;

/// Step 1 of §4.5: advance the instruction cursor until the 3-instruction sequence
/// `PushBytes(empty), Op(IF), PushBytes("ord")` has just been consumed. Returns `false` once
/// the script is exhausted without another match.
fn scan_to_envelope_start(instructions: &mut Instructions<'_>) -> bool {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Start,
        SawFalse,
        SawFalseIf,
    }

    let mut state = State::Start;
    for instruction in instructions.by_ref() {
        let Ok(instruction) = instruction else {
            state = State::Start;
            continue;
        };
        state = match (state, &instruction) {
            (_, Instruction::PushBytes(p)) if p.as_bytes().is_empty() => State::SawFalse,
            (State::SawFalse, Instruction::Op(op)) if *op == OP_IF => State::SawFalseIf,
            (State::SawFalseIf, Instruction::PushBytes(p)) if p.as_bytes() == PROTOCOL_ID => {
                return true;
            }
            _ => State::Start,
        };
    }
    false
}

/// Steps 2–3 of §4.5: collect fields until the body tag or `OP_ENDIF` commits the envelope,
/// then apply the unknown-even-tag rule.
fn parse_one_envelope(instructions: &mut Instructions<'_>) -> Result<Inscription, InscriptionError> {
    let mut fields: BTreeMap<u8, Vec<u8>> = BTreeMap::new();

    loop {
        let instruction = next_instruction(instructions)?;
        match instruction {
            Instruction::PushBytes(p) if p.as_bytes().len() == 1 && p.as_bytes()[0] == Tag::BODY_BYTE => {
                let body = collect_body(instructions)?;
                fields.insert(Tag::BODY_BYTE, body);
                break;
            }
            Instruction::PushBytes(p) if p.as_bytes().len() == 1 => {
                let tag = p.as_bytes()[0];
                let value = match next_instruction(instructions)? {
                    Instruction::PushBytes(v) => v.as_bytes().to_vec(),
                    _ => return Err(InscriptionError::InvalidInstruction),
                };
                if fields.insert(tag, value).is_some() {
                    return Err(InscriptionError::DuplicateTag);
                }
            }
            Instruction::Op(op) if op == OP_ENDIF => break,
            _ => return Err(InscriptionError::InvalidInstruction),
        }
    }

    if fields
        .keys()
        .any(|&tag| Tag::from_byte(tag).is_unrecognized_even())
    {
        return Err(InscriptionError::UnrecognizedEvenField);
    }

    Ok(Inscription {
        content_type: fields.remove(&Tag::CONTENT_TYPE_BYTE),
        body: fields.remove(&Tag::BODY_BYTE),
    })
}

fn collect_body(instructions: &mut Instructions<'_>) -> Result<Vec<u8>, InscriptionError> {
    let mut body = Vec::new();
    loop {
        match next_instruction(instructions)? {
            Instruction::PushBytes(p) => body.extend_from_slice(p.as_bytes()),
            Instruction::Op(op) if op == OP_ENDIF => return Ok(body),
            _ => return Err(InscriptionError::InvalidInstruction),
        }
    }
}

fn next_instruction<'a>(
    instructions: &mut Instructions<'a>,
) -> Result<Instruction<'a>, InscriptionError> {
    instructions
        .next()
        .ok_or(InscriptionError::InvalidInstruction)?
        .map_err(InscriptionError::from)
}

/// Per-transaction extraction: walk inputs in order, skip inputs without a witness, swallow
/// per-input errors, and number the emitted records `(tx_in_index, tx_in_offset)` per §4.5/I5.
pub fn extract_transaction_inscriptions(witnesses: &[Witness]) -> Vec<TransactionInscription> {
    let mut inscriptions = Vec::new();
    for (tx_in_index, witness) in witnesses.iter().enumerate() {
        if witness.is_empty() {
            continue;
        }
        let script = match candidate_script(witness) {
            Ok(script) => script,
            Err(_) => continue,
        };
        for (tx_in_offset, inscription) in parse_script(&script).into_iter().enumerate() {
            inscriptions.push(TransactionInscription {
                inscription,
                tx_in_index: tx_in_index as u32,
                tx_in_offset: tx_in_offset as u32,
            });
        }
    }
    inscriptions
}
