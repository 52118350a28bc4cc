//! Entry and exit conditions over the indicator snapshot.
//!
//! Short-period mean-reversion setup: RSI extremes and Bollinger breakouts
//! pick the direction, a momentum agreement (ADX strength with MACD and
//! stochastic alignment) covers trending moves. Exits fire when the move
//! has reverted to neutral or momentum turns against the open side.

use crate::indicators::IndicatorSnapshot;
use crate::models::Side;

const RSI_OVERSOLD: f64 = 15.0;
const RSI_OVERBOUGHT: f64 = 85.0;
const RSI_EXIT_LOW: f64 = 45.0;
const RSI_EXIT_HIGH: f64 = 55.0;
const ADX_ENTRY: f64 = 20.0;
const ADX_EXIT: f64 = 15.0;
const MIDDLE_BAND_EXIT_DISTANCE: f64 = 0.0010;

pub fn entry_signal(snap: &IndicatorSnapshot) -> Option<Side> {
    if snap.rsi < RSI_OVERSOLD {
        return Some(Side::Buy);
    }
    if snap.rsi > RSI_OVERBOUGHT {
        return Some(Side::Sell);
    }

    if snap.price < snap.boll_lower {
        return Some(Side::Buy);
    }
    if snap.price > snap.boll_upper {
        return Some(Side::Sell);
    }

    if snap.adx > ADX_ENTRY {
        if snap.macd > snap.macd_signal && snap.stoch_k > snap.stoch_d {
            return Some(Side::Buy);
        }
        if snap.macd < snap.macd_signal && snap.stoch_k < snap.stoch_d {
            return Some(Side::Sell);
        }
    }

    None
}

pub fn exit_signal(snap: &IndicatorSnapshot, side: Side) -> bool {
    if snap.rsi > RSI_EXIT_LOW && snap.rsi < RSI_EXIT_HIGH {
        return true;
    }

    if (snap.price - snap.boll_middle).abs() < MIDDLE_BAND_EXIT_DISTANCE {
        return true;
    }

    if snap.adx < ADX_EXIT {
        return true;
    }

    match side {
        Side::Buy => snap.macd < snap.macd_signal && snap.stoch_k < snap.stoch_d,
        Side::Sell => snap.macd > snap.macd_signal && snap.stoch_k > snap.stoch_d,
    }
}
