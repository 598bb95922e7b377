pub mod assets;
pub mod clock;
pub mod fractional_index;
pub mod shutdown;
