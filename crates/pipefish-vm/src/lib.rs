//! The Pipefish virtual machine.
//!
//! This crate owns everything that survives compilation: the value
//! representation, the concrete-type registry, the register instruction set,
//! the single-threaded interpreter, and the tracking instrumentation.
//!
//! The compiler (in `pipefish-lang`) writes bytecode, constants and type
//! information into a `Vm`; after initialization the type registry is frozen
//! and the machine only reads it.

pub mod opcode;
pub mod tracking;
pub mod typeinfo;
pub mod values;
pub mod vm;

pub use opcode::{Op, Reg};
pub use tracking::{TrackingData, TrackingFlavor};
pub use typeinfo::{TypeCheck, TypeInfo, TypeRegistry};
pub use values::{AbstractType, Closure, Payload, RuntimeError, Value, ValueType};
pub use vm::{
    CapturingHandler, FuncInfo, InputHandler, OutputHandler, ScriptedHandler, StdinHandler,
    StdoutHandler, Vm,
};
