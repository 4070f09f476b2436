//! Branch events delivered by the instrumentation host.

/// Control-flow class of a branch instruction.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    /// Has a fall-through successor.
    Conditional = 0,
    Call = 1,
    UnconditionalJump = 2,
    Return = 3,
}

impl BranchKind {
    /// Only branches with a fall-through successor and calls take part in
    /// edge coverage, the same selection afl-as makes.
    #[inline]
    pub fn is_tracked(self) -> bool {
        matches!(self, BranchKind::Conditional | BranchKind::Call)
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(BranchKind::Conditional),
            1 => Some(BranchKind::Call),
            2 => Some(BranchKind::UnconditionalJump),
            3 => Some(BranchKind::Return),
            _ => None,
        }
    }
}

/// Statically encoded destination of a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchTarget {
    Direct(u64),
    /// Indirect branch, or an operand that did not decode as an address.
    Unknown,
}

impl BranchTarget {
    pub fn address(self) -> Option<u64> {
        match self {
            BranchTarget::Direct(addr) => Some(addr),
            BranchTarget::Unknown => None,
        }
    }
}

impl From<Option<u64>> for BranchTarget {
    fn from(addr: Option<u64>) -> Self {
        addr.map_or(BranchTarget::Unknown, BranchTarget::Direct)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchEvent {
    pub source: u64,
    /// Decoded mnemonic token, e.g. `jnz`.
    pub mnemonic: String,
    pub target: BranchTarget,
    pub kind: BranchKind,
}

impl BranchEvent {
    pub fn new(
        source: u64,
        mnemonic: impl Into<String>,
        target: BranchTarget,
        kind: BranchKind,
    ) -> Self {
        Self {
            source,
            mnemonic: mnemonic.into(),
            target,
            kind,
        }
    }

    pub fn conditional(source: u64, mnemonic: impl Into<String>, target: u64) -> Self {
        Self::new(
            source,
            mnemonic,
            BranchTarget::Direct(target),
            BranchKind::Conditional,
        )
    }

    pub fn call(source: u64, target: BranchTarget) -> Self {
        Self::new(source, "call", target, BranchKind::Call)
    }

    /// Build an event from the host's textual disassembly, for hosts that do
    /// not expose the operand in structured form.
    pub fn from_disassembly(source: u64, disassembly: &str, kind: BranchKind) -> Self {
        let decoded = decode_disassembly(disassembly);
        Self {
            source,
            mnemonic: decoded.mnemonic.to_string(),
            target: decoded.target,
            kind,
        }
    }
}

/// Mnemonic token and operand recovered from a disassembled branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedBranch<'a> {
    pub mnemonic: &'a str,
    pub target: BranchTarget,
}

/// Split `text` on single spaces: the last token is the operand, the one
/// before it the mnemonic. A one-token text has an empty mnemonic.
pub fn decode_disassembly(text: &str) -> DecodedBranch<'_> {
    let (head, operand) = match text.rfind(' ') {
        Some(pos) => (&text[..pos], &text[pos + 1..]),
        None => ("", text),
    };
    let mnemonic = head.rsplit(' ').next().unwrap_or("");

    DecodedBranch {
        mnemonic,
        target: parse_hex_operand(operand).into(),
    }
}

/// Parse a complete base-16 operand, with or without a `0x` prefix.
pub fn parse_hex_operand(token: &str) -> Option<u64> {
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}
