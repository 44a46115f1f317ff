//! The register instruction set.
//!
//! Operands name frame-local registers (`Reg`), slots in the constant pool
//! (`c`), slots in the globals region (`g`), code addresses (`to`), or
//! indices into the VM's token table (`tok`). The compiler decides every
//! frame's layout, so registers are dense and fixed per function.
//!
//! Instructions whose operation can fail at runtime carry a token index;
//! on failure the destination register receives an error value and
//! execution continues.

use crate::tracking::TrackingFlavor;
use crate::values::{AbstractType, ValueType};

/// A frame-local register number.
pub type Reg = u32;

/// One instruction.
#[derive(Debug, Clone)]
pub enum Op {
    // --- Data movement ---
    /// dst ← constant pool\[c\]
    LoadC { dst: Reg, c: u32 },
    /// dst ← globals\[g\]
    LoadG { dst: Reg, g: u32 },
    /// globals\[g\] ← src
    StoreG { g: u32, src: Reg },
    Mov { dst: Reg, src: Reg },

    // --- Integer arithmetic ---
    Addi { dst: Reg, a: Reg, b: Reg },
    Subi { dst: Reg, a: Reg, b: Reg },
    Muli { dst: Reg, a: Reg, b: Reg },
    /// `/` on ints: produces a float; division by zero errors.
    Divi { dst: Reg, a: Reg, b: Reg, tok: u32 },
    /// `div`: integer division.
    Idiv { dst: Reg, a: Reg, b: Reg, tok: u32 },
    Modi { dst: Reg, a: Reg, b: Reg, tok: u32 },
    Negi { dst: Reg, src: Reg },

    // --- Float arithmetic ---
    Addf { dst: Reg, a: Reg, b: Reg },
    Subf { dst: Reg, a: Reg, b: Reg },
    Mulf { dst: Reg, a: Reg, b: Reg },
    Divf { dst: Reg, a: Reg, b: Reg, tok: u32 },
    Negf { dst: Reg, src: Reg },
    /// Int-to-float conversion, inserted by the compiler for mixed operands.
    Itof { dst: Reg, src: Reg },

    // --- Other `+` family operations ---
    /// String/rune concatenation; the result is always a string.
    Cat { dst: Reg, a: Reg, b: Reg },
    /// List concatenation.
    AddList { dst: Reg, a: Reg, b: Reg },
    /// Set union.
    AddSet { dst: Reg, a: Reg, b: Reg },
    /// `&`: append an element to a list or insert into a set.
    AddElt { dst: Reg, a: Reg, b: Reg, tok: u32 },

    // --- Comparison (operands same numeric representation) ---
    Lt { dst: Reg, a: Reg, b: Reg },
    Le { dst: Reg, a: Reg, b: Reg },
    Gt { dst: Reg, a: Reg, b: Reg },
    Ge { dst: Reg, a: Reg, b: Reg },
    /// Deep structural equality.
    Eq { dst: Reg, a: Reg, b: Reg },
    Not { dst: Reg, src: Reg, tok: u32 },

    // --- Containers ---
    /// dst ← list of n consecutive registers starting at first.
    MkList { dst: Reg, first: Reg, n: u32 },
    MkSet { dst: Reg, first: Reg, n: u32 },
    /// n pair values in consecutive registers.
    MkMap { dst: Reg, first: Reg, n: u32, tok: u32 },
    MkPair { dst: Reg, a: Reg, b: Reg },
    MkTuple { dst: Reg, first: Reg, n: u32 },
    /// Struct construction; fields already type-checked by the compiler's
    /// dispatch, validators run separately.
    MkStruct { dst: Reg, ty: ValueType, first: Reg, n: u32 },
    /// Closure construction: function-pointer plus captured values.
    MkFunc { dst: Reg, func: u32, first: Reg, n: u32 },
    Index { dst: Reg, container: Reg, index: Reg, tok: u32 },
    Slice { dst: Reg, container: Reg, from: Reg, to: Reg, tok: u32 },
    /// Field access at a position known at compile time.
    Field { dst: Reg, strct: Reg, pos: u32 },
    /// `with`: copy a struct or map with pair updates from n consecutive
    /// registers.
    With { dst: Reg, src: Reg, first: Reg, n: u32, tok: u32 },
    Len { dst: Reg, src: Reg, tok: u32 },
    /// Membership: value in container, or value in type.
    In { dst: Reg, needle: Reg, haystack: Reg, tok: u32 },
    /// `...`: spread a list into a tuple.
    Spread { dst: Reg, src: Reg, tok: u32 },
    /// The key::value pairs of anything rangeable, as a list: lists and
    /// tuples by index, strings by index::rune, maps in insertion order,
    /// sets element::element, enum types index::element. Drives
    /// for-over-range.
    Pairs { dst: Reg, src: Reg, tok: u32 },
    /// Map a function value over a list, first error wins.
    MapList { dst: Reg, src: Reg, f: Reg, tok: u32 },
    /// Keep the elements of a list a predicate function accepts.
    FilterList { dst: Reg, src: Reg, f: Reg, tok: u32 },

    // --- Types ---
    /// dst ← the type of src, as a type value.
    TypeOf { dst: Reg, src: Reg },
    /// dst ← the round-trippable literal of src, as a string.
    LitStr { dst: Reg, src: Reg },
    Cast { dst: Reg, src: Reg, ty: ValueType, tok: u32 },
    /// Cast to a type held in a register (`cast x, T`).
    CastV { dst: Reg, src: Reg, tsrc: Reg, tok: u32 },
    /// Overwrite the type index of a register in place (clone arithmetic).
    Retag { reg: Reg, ty: ValueType },
    /// Union of two type values (`int/string` in value position).
    TypeUnion { dst: Reg, a: Reg, b: Reg },
    /// Run the generated validator for a clone or struct type on src;
    /// dst receives the validated value or an error.
    Validate { dst: Reg, src: Reg, ty: ValueType, tok: u32 },

    // --- Control flow ---
    Jmp { to: u32 },
    /// Fall through if src is `true`; jump otherwise. The compiler guards
    /// with a type test when the static type is not exactly bool.
    Qtru { src: Reg, to: u32 },
    /// Fall through if src's concrete type is in `types`; jump otherwise.
    Qtyp { src: Reg, types: AbstractType, to: u32 },

    // --- Calls ---
    /// Call function-table entry `func`; n argument registers starting at
    /// `first_arg` are copied into the callee frame's slots 0..n.
    Call { func: u32, dst: Reg, first_arg: Reg, n: u32 },
    /// Indirect call through a function value.
    Dofn { dst: Reg, fsrc: Reg, first_arg: Reg, n: u32, tok: u32 },
    Ret { src: Reg },

    // --- Errors ---
    /// Create an error value with a stable id and argument strings taken
    /// from the literal form of the given registers.
    MkErr { dst: Reg, id: String, tok: u32, args: Vec<Reg> },
    /// `error "msg"`: user-made error carrying the message and any
    /// attached values.
    UserErr { dst: Reg, msg: Reg, tok: u32, values: Vec<Reg> },
    /// `unwrap`: NULL becomes an error, everything else passes through.
    Unwrap { dst: Reg, src: Reg, tok: u32 },
    /// `valid`: false for error values, true otherwise.
    Valid { dst: Reg, src: Reg },

    // --- Instrumentation and output ---
    /// Append a tracking record. `log_to`/`log_time` are globals slots
    /// holding the output-routing and timestamping flags at this call site.
    Track {
        flavor: TrackingFlavor,
        tok: u32,
        args: Vec<TrackOperand>,
        log_to: u32,
        log_time: u32,
    },
    /// Make src visible through the output handler.
    Post { src: Reg },
    /// Read a line through the input handler, blocking until it arrives;
    /// the prompt register names what to show the user.
    Input { dst: Reg, prompt: Reg },
}

/// An argument to a tracking record: source text captured at compile time,
/// or a register read at runtime.
#[derive(Debug, Clone)]
pub enum TrackOperand {
    Str(String),
    Reg(Reg),
}
