//! Core data types for probescope
//!
//! This module contains the fundamental data structures used throughout
//! the crate for describing observed variables and interpreting the raw
//! 32-bit words sampled from target memory or decoded from the trace
//! stream.
//!
//! # Main Types
//!
//! - [`VariableType`] - Enum of supported variable types (u8, i16, f32, ...)
//! - [`Fractional`] - Fixed-point interpretation applied after the type cast
//! - [`Variable`] - Configuration for a variable to observe (address, type,
//!   shift/mask, fixed-point settings)
//!
//! # Value pipeline
//!
//! Raw samples arrive as untyped 32-bit words. Interpretation happens in
//! three steps, all owned by [`Variable::interpret`]:
//!
//! 1. `(raw >> shift) & mask` - extract a sub-field of the word
//! 2. reinterpret the extracted bits according to [`VariableType`]
//!    (bit-reinterpretation, not conversion - an `F32` variable reads the
//!    word as IEEE-754 bits)
//! 3. optionally scale by the [`Fractional`] fixed-point settings

use serde::{Deserialize, Serialize};

/// Represents the type of a variable being observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum VariableType {
    /// 8-bit unsigned integer
    U8,
    /// 8-bit signed integer
    I8,
    /// 16-bit unsigned integer
    U16,
    /// 16-bit signed integer
    I16,
    /// 32-bit unsigned integer
    #[default]
    U32,
    /// 32-bit signed integer
    I32,
    /// 32-bit floating point
    F32,
}

impl VariableType {
    /// Returns the size in bytes of this variable type
    pub fn size_bytes(&self) -> usize {
        match self {
            VariableType::U8 | VariableType::I8 => 1,
            VariableType::U16 | VariableType::I16 => 2,
            VariableType::U32 | VariableType::I32 | VariableType::F32 => 4,
        }
    }

    /// Returns true if this type is interpreted as a signed quantity
    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            VariableType::I8 | VariableType::I16 | VariableType::I32
        )
    }

    /// Reinterpret the low bytes of a raw 32-bit word as this type.
    ///
    /// This is a bit-reinterpretation: no numeric conversion happens before
    /// the cast to `f64` for plotting.
    pub fn reinterpret(&self, raw: u32) -> f64 {
        match self {
            VariableType::U8 => (raw as u8) as f64,
            VariableType::I8 => (raw as u8 as i8) as f64,
            VariableType::U16 => (raw as u16) as f64,
            VariableType::I16 => (raw as u16 as i16) as f64,
            VariableType::U32 => raw as f64,
            VariableType::I32 => (raw as i32) as f64,
            VariableType::F32 => f32::from_bits(raw) as f64,
        }
    }

    /// Parse little-endian raw bytes into a 32-bit word for this type
    pub fn word_from_bytes(&self, bytes: &[u8]) -> Option<u32> {
        if bytes.len() < self.size_bytes() {
            return None;
        }
        Some(match self.size_bytes() {
            1 => bytes[0] as u32,
            2 => u16::from_le_bytes([bytes[0], bytes[1]]) as u32,
            _ => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        })
    }

    /// Convert a plot-side value into the little-endian bytes of this type
    /// (used for variable write-back)
    pub fn to_bytes(&self, value: f64) -> Vec<u8> {
        match self {
            VariableType::U8 => vec![value as u8],
            VariableType::I8 => vec![value as i8 as u8],
            VariableType::U16 => (value as u16).to_le_bytes().to_vec(),
            VariableType::I16 => (value as i16).to_le_bytes().to_vec(),
            VariableType::U32 => (value as u32).to_le_bytes().to_vec(),
            VariableType::I32 => (value as i32).to_le_bytes().to_vec(),
            VariableType::F32 => (value as f32).to_le_bytes().to_vec(),
        }
    }
}

impl std::fmt::Display for VariableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VariableType::U8 => write!(f, "u8"),
            VariableType::I8 => write!(f, "i8"),
            VariableType::U16 => write!(f, "u16"),
            VariableType::I16 => write!(f, "i16"),
            VariableType::U32 => write!(f, "u32"),
            VariableType::I32 => write!(f, "i32"),
            VariableType::F32 => write!(f, "f32"),
        }
    }
}

/// Fixed-point interpretation of an integer variable.
///
/// The typed integer value is divided by `2^fractional_bits` and scaled by
/// `base`. Signedness follows the variable's [`VariableType`], so an `I16`
/// variable with 15 fractional bits maps 32767 to just under `base` and
/// -32768 to exactly `-base`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fractional {
    /// Number of fractional bits
    pub fractional_bits: u32,
    /// Full-scale value the fraction is multiplied by
    pub base: f64,
}

impl Fractional {
    /// Create fixed-point settings with the given fractional bit count and
    /// a full-scale of 1.0
    pub fn new(fractional_bits: u32) -> Self {
        Self {
            fractional_bits,
            base: 1.0,
        }
    }

    /// Set the full-scale value
    pub fn with_base(mut self, base: f64) -> Self {
        self.base = base;
        self
    }

    /// Apply the fixed-point scaling to an already-typed value
    pub fn apply(&self, typed: f64) -> f64 {
        typed / f64::from(1u32 << self.fractional_bits.min(31)) * self.base
    }
}

/// Display format for a plotted series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DisplayFormat {
    /// Decimal
    #[default]
    Dec,
    /// Hexadecimal
    Hex,
    /// Binary
    Bin,
}

/// Configuration for a variable to observe.
///
/// The variable's `name` is its identity: registries and plots key their
/// maps by it, so renaming a variable requires re-keying (see
/// [`crate::plot::VariableRegistry::rename`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    /// Human-readable name, unique within a registry
    pub name: String,
    /// Memory address to read from
    pub address: u64,
    /// Type of the variable
    pub var_type: VariableType,
    /// Color for plotting (RGBA)
    pub color: [u8; 4],
    /// Whether this variable is currently being sampled
    pub enabled: bool,
    /// Right-shift applied to the raw word before the mask
    pub shift: u32,
    /// Mask applied to the shifted word (defaults to all bits)
    pub mask: u32,
    /// Optional fixed-point interpretation
    pub fractional: Option<Fractional>,
    /// Whether symbol resolution located this variable in the executable
    #[serde(default)]
    pub is_found: bool,
}

impl Default for Variable {
    fn default() -> Self {
        Self {
            name: String::from("Unnamed"),
            address: 0,
            var_type: VariableType::U32,
            color: [255, 255, 255, 255],
            enabled: true,
            shift: 0,
            mask: u32::MAX,
            fractional: None,
            is_found: false,
        }
    }
}

impl Variable {
    /// Create a new variable with the given parameters and an
    /// auto-generated color
    pub fn new(name: impl Into<String>, address: u64, var_type: VariableType) -> Self {
        let name = name.into();
        let color = Self::generate_color(&name);
        Self {
            name,
            address,
            var_type,
            color,
            ..Default::default()
        }
    }

    /// Set the display color
    pub fn with_color(mut self, color: [u8; 4]) -> Self {
        self.color = color;
        self
    }

    /// Set the shift/mask sub-field extraction
    pub fn with_field(mut self, shift: u32, mask: u32) -> Self {
        self.shift = shift;
        self.mask = mask;
        self
    }

    /// Set the fixed-point interpretation
    pub fn with_fractional(mut self, fractional: Fractional) -> Self {
        self.fractional = Some(fractional);
        self
    }

    /// Interpret a raw 32-bit word sampled for this variable.
    ///
    /// Applies shift/mask extraction, the type reinterpretation, and the
    /// optional fixed-point scaling, in that order.
    pub fn interpret(&self, raw: u32) -> f64 {
        let field = (raw >> (self.shift & 31)) & self.mask;
        let typed = self.var_type.reinterpret(field);
        match self.fractional {
            Some(frac) => frac.apply(typed),
            None => typed,
        }
    }

    /// Generate a distinct color from the variable name.
    ///
    /// Uses the golden ratio to spread hues evenly across the color wheel so
    /// names hash to visually distinct, medium-brightness colors.
    pub fn generate_color(name: &str) -> [u8; 4] {
        const GOLDEN_RATIO: f32 = 0.618_034;

        let hash = name
            .bytes()
            .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
        let hue = ((hash as f32 * GOLDEN_RATIO) % 1.0) * 360.0;
        let (r, g, b) = hsv_to_rgb(hue, 0.7, 0.85);
        [r, g, b, 255]
    }
}

/// Convert HSV (hue 0-360, saturation 0-1, value 0-1) to RGB
fn hsv_to_rgb(hue: f32, saturation: f32, value: f32) -> (u8, u8, u8) {
    let c = value * saturation;
    let x = c * (1.0 - ((hue / 60.0) % 2.0 - 1.0).abs());
    let m = value - c;

    let (r, g, b) = match (hue / 60.0) as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    (
        ((r + m) * 255.0) as u8,
        ((g + m) * 255.0) as u8,
        ((b + m) * 255.0) as u8,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_type_size() {
        assert_eq!(VariableType::U8.size_bytes(), 1);
        assert_eq!(VariableType::I16.size_bytes(), 2);
        assert_eq!(VariableType::U32.size_bytes(), 4);
        assert_eq!(VariableType::F32.size_bytes(), 4);
    }

    #[test]
    fn test_reinterpret_is_bit_level() {
        // 0xFFFF as i16 is -1, not 65535
        assert_eq!(VariableType::I16.reinterpret(0xFFFF), -1.0);
        assert_eq!(VariableType::U16.reinterpret(0xFFFF), 65535.0);

        let bits = 3.25f32.to_bits();
        assert_eq!(VariableType::F32.reinterpret(bits), 3.25);
    }

    #[test]
    fn test_shift_mask_extraction() {
        // Extract bits [15:8] of the word
        let var = Variable::new("field", 0x2000_0000, VariableType::U8).with_field(8, 0xFF);
        assert_eq!(var.interpret(0x0012_3456), 0x34 as f64);
    }

    #[test]
    fn test_signed_fractional_q15() {
        let var = Variable::new("q15", 0x2000_0000, VariableType::I16)
            .with_fractional(Fractional::new(15));
        assert!((var.interpret(32767) - 1.0).abs() < 1e-3);
        // -32768 as a 16-bit two's complement pattern
        assert!((var.interpret(0x8000) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_unsigned_fractional_q16() {
        let var = Variable::new("q16", 0x2000_0000, VariableType::U16)
            .with_fractional(Fractional::new(16));
        assert!((var.interpret(32767) - 0.5).abs() < 1e-3);
        assert!((var.interpret(65534) - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_word_from_bytes_round_trip() {
        let bytes = VariableType::F32.to_bytes(1.5);
        let word = VariableType::F32.word_from_bytes(&bytes).unwrap();
        assert_eq!(VariableType::F32.reinterpret(word), 1.5);

        assert_eq!(VariableType::U16.word_from_bytes(&[0x34, 0x12]), Some(0x1234));
        assert_eq!(VariableType::U32.word_from_bytes(&[1]), None);
    }
}
