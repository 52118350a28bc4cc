pub mod account;
pub mod candle;
pub mod position;
pub mod symbol;
pub mod tick;
pub mod timeframe;

pub use account::AccountSnapshot;
pub use candle::{Candle, CandleSeries};
pub use position::{Position, Side};
pub use symbol::{SymbolSpec, SymbolTable};
pub use tick::Tick;
pub use timeframe::Timeframe;
