//! Wire format shared by the daemon and its front end.
//!
//! Every request starts with a message kind word which the daemon
//! answers with an [`MessageKind::Ack`] word before anything else is
//! exchanged. Kinds that carry a VM id expect one more word, which is
//! acknowledged the same way. Text responses are a length word
//! followed by exactly that many bytes. There is no terminator and no
//! checksum, so both ends must agree on [`Word`] and its byte order.

use crate::defs::wire::*;
use crate::defs::RESPONSE_CAP;
use crate::VirtdError;
use std::io::{Read, Write};
use tracing::warn;

pub use crate::defs::wire::Word;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
	QueryStatus,
	Launch,
	Kill,
	GetAffinity,
	Ack,
}

impl MessageKind {
	pub fn from_word(word: Word) -> Option<Self> {
		match word {
			KIND_QUERY_STATUS => Some(Self::QueryStatus),
			KIND_LAUNCH => Some(Self::Launch),
			KIND_KILL => Some(Self::Kill),
			KIND_GET_AFFINITY => Some(Self::GetAffinity),
			KIND_ACK => Some(Self::Ack),
			_ => None,
		}
	}

	pub fn to_word(self) -> Word {
		match self {
			Self::QueryStatus => KIND_QUERY_STATUS,
			Self::Launch => KIND_LAUNCH,
			Self::Kill => KIND_KILL,
			Self::GetAffinity => KIND_GET_AFFINITY,
			Self::Ack => KIND_ACK,
		}
	}

	/// Whether the kind is followed by a VM id word.
	pub fn takes_vm_id(self) -> bool {
		matches!(self, Self::Launch | Self::Kill | Self::GetAffinity)
	}
}

pub fn read_word<R: Read>(r: &mut R) -> Result<Word, VirtdError> {
	let mut buf = [0u8; WORD_SIZE];
	r.read_exact(&mut buf)?;
	Ok(Word::from_ne_bytes(buf))
}

pub fn write_word<W: Write>(w: &mut W, word: Word) -> Result<(), VirtdError> {
	w.write_all(&word.to_ne_bytes())?;
	Ok(())
}

pub fn send_ack<W: Write>(w: &mut W) -> Result<(), VirtdError> {
	write_word(w, KIND_ACK)
}

pub fn expect_ack<R: Read>(r: &mut R) -> Result<(), VirtdError> {
	match read_word(r)? {
		KIND_ACK => Ok(()),
		_ => Err(VirtdError::Protocol("expected ack")),
	}
}

/// Clips `text` to the response cap, keeping a trailing newline when
/// the input had one.
pub fn cap_response(text: &mut String) -> bool {
	if text.len() <= RESPONSE_CAP {
		return false;
	}
	let newline = text.ends_with('\n');
	let mut cut = if newline { RESPONSE_CAP - 1 } else { RESPONSE_CAP };
	while !text.is_char_boundary(cut) {
		cut -= 1;
	}
	text.truncate(cut);
	if newline {
		text.push('\n');
	}
	true
}

/// Sends a length-prefixed text response, truncated to the cap.
pub fn write_payload<W: Write>(
	w: &mut W,
	text: &str,
) -> Result<usize, VirtdError> {
	let mut text = text.to_owned();
	if cap_response(&mut text) {
		warn!(cap = RESPONSE_CAP, "response truncated");
	}
	let len = Word::try_from(text.len())
		.map_err(|_| VirtdError::Protocol("payload length"))?;
	write_word(w, len)?;
	w.write_all(text.as_bytes())?;
	w.flush()?;
	Ok(text.len())
}

pub fn read_payload<R: Read>(r: &mut R) -> Result<String, VirtdError> {
	let len = read_word(r)?;
	let len = usize::try_from(len)
		.ok()
		.filter(|l| *l <= RESPONSE_CAP)
		.ok_or(VirtdError::Protocol("payload length out of range"))?;
	let mut buf = vec![0u8; len];
	r.read_exact(&mut buf)?;
	Ok(String::from_utf8_lossy(&buf).into_owned())
}
