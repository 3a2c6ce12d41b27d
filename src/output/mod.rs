//! MMLB container
//!
//! All integers are little-endian. Strings are a u16 byte length followed by
//! UTF-8. Layout:
//!
//! ```text
//! "MMLB" u16 version  str target
//! str title  str composer  str programmer  str game  str album
//! u8 callbacks      { str name }
//! u16 effects       { u8 kind  u8 id  u8 freq  u16 refs
//!                     u16 main  u16 loop  { value }
//!                     u8 has_sample [u32 rate  u8 bits  u32 len  data] }
//! u8 songs          { u8 number
//!                     u8 tunables { str name  i32 value }
//!                     u8 channels { stream }
//!                     u16 patterns { stream } }
//!
//! value  = 0 i32 | 1 str | 2 u8 (waveform reference)
//! stream = str name  u32 loop (NO_LOOP if none)  u32 ticks  u32 len  bytes
//! ```
//!
//! The whole file may be gzip compressed.

pub mod json;
pub mod reader;
pub mod writer;

pub use json::MmlbJson;
pub use reader::{Module, OutputReader};
pub use writer::OutputWriter;

pub const MAGIC: &[u8; 4] = b"MMLB";
pub const VERSION: u16 = 1;

/// Loop field of a stream that ends with END
pub const NO_LOOP: u32 = 0xFFFF_FFFF;

/// Tags of serialized list values
pub mod value {
    pub const INT: u8 = 0;
    pub const STR: u8 = 1;
    pub const WAVE_REF: u8 = 2;
}
