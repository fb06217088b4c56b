//! Price-lookup capability.
//!
//! The engine never fetches quotes itself. Callers inject a [`PriceLookup`]
//! and own its timeout, retry and caching policy. A missing quote is a
//! normal outcome: the equity mark falls back to average cost and records
//! the symbol.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::fixedpoint::Money;
use crate::types::normalize_symbol;

/// Canonical mark map type (symbol -> price).
pub type MarkMap = BTreeMap<String, Money>;

/// Helper to build a [`MarkMap`] with minimal boilerplate. Symbols are
/// normalized.
pub fn marks<I, S>(items: I) -> MarkMap
where
    I: IntoIterator<Item = (S, Money)>,
    S: AsRef<str>,
{
    let mut m = MarkMap::new();
    for (sym, px) in items {
        m.insert(normalize_symbol(sym.as_ref()), px);
    }
    m
}

/// Current market price of a symbol, if known.
pub trait PriceLookup: Send + Sync {
    fn price(&self, symbol: &str) -> Option<Money>;
}

impl PriceLookup for MarkMap {
    fn price(&self, symbol: &str) -> Option<Money> {
        self.get(symbol).copied()
    }
}

impl<F> PriceLookup for F
where
    F: Fn(&str) -> Option<Money> + Send + Sync,
{
    fn price(&self, symbol: &str) -> Option<Money> {
        self(symbol)
    }
}

// No blanket impl for `&P`: it would overlap with the closure impl, since
// `&F` is itself `Fn`. Consumers take `&P where P: ?Sized` instead.

impl<P: PriceLookup + ?Sized> PriceLookup for Arc<P> {
    fn price(&self, symbol: &str) -> Option<Money> {
        (**self).price(symbol)
    }
}

/// A lookup that knows no prices. Every position is valued at average cost.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPrices;

impl PriceLookup for NoPrices {
    fn price(&self, _symbol: &str) -> Option<Money> {
        None
    }
}

/// Only strictly positive quotes are usable.
pub(crate) fn usable_price<P: PriceLookup + ?Sized>(prices: &P, symbol: &str) -> Option<Money> {
    prices.price(symbol).filter(|p| p.is_positive())
}

// ---------------------------------------------------------------------------
// CachedPriceLookup
// ---------------------------------------------------------------------------

/// Caller-owned memoization around another lookup.
///
/// Hits are served for `ttl` after they were fetched. Misses and
/// non-positive quotes are never cached, so a recovering source is picked up
/// on the next call.
pub struct CachedPriceLookup<P> {
    inner: P,
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, Money)>>,
}

impl<P: PriceLookup> CachedPriceLookup<P> {
    pub fn new(inner: P, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Drop every cached quote.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn into_inner(self) -> P {
        self.inner
    }
}

impl<P: PriceLookup> PriceLookup for CachedPriceLookup<P> {
    fn price(&self, symbol: &str) -> Option<Money> {
        let now = Instant::now();
        // A poisoned cache degrades to pass-through.
        if let Ok(entries) = self.entries.lock() {
            if let Some((at, px)) = entries.get(symbol) {
                if now.duration_since(*at) < self.ttl {
                    return Some(*px);
                }
            }
        }

        let fetched = usable_price(&self.inner, symbol)?;
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(symbol.to_string(), (now, fetched));
        }
        Some(fetched)
    }
}

impl<P> std::fmt::Debug for CachedPriceLookup<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedPriceLookup")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
