//! Derived float series and the incremental refresh engine.
//!
//! Indicators are float timelapses of a fixed width computed from one or more
//! *broadcasters* (sources or other indicators). Dependencies push refresh
//! windows; the indicator recomputes only the span every dependency has already
//! produced, then broadcasts its own window downstream. The whole graph updates
//! synchronously on the pushing thread.
//!
//! The per-dependency bookkeeping is a high-water-mark join: each dependency's
//! requested bounds only ever grow, and the recomputable span is the minimum of
//! those marks across dependencies, clamped by the triggering event so a node
//! never reports more than what just happened.

pub mod moving;
pub mod predictor;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use chrono::{DateTime, Utc};

use crate::domain::{CandleComponent, Interval};
use crate::engine::event::{Disposable, Event, NodeId, RefreshCallback};
use crate::engine::source::{CandleSource, PriceSource};
use crate::error::{Result, SeriesError};
use crate::models::{GrowingArray, Timelapse};

pub use moving::{MovingMean, MovingVariance};
pub use predictor::{LeastSquaresLine, Predictor, PredictorAlgorithm, PredictorColumn, Side};

/// Rows per storage chunk for indicators.
pub(crate) const INDICATOR_CHUNK_ROWS: usize = 3600;

/// Warn below this chunk size; a busy indicator would allocate constantly.
const COMFORTABLE_CHUNK_ROWS: usize = 60;

/// A broadcaster an indicator reads from, with its scalar projection fixed at
/// construction: price sources read as-is, candle sources through one component,
/// indicator parents through their single float column.
#[derive(Clone)]
pub enum Parent {
    Prices(PriceSource),
    Candles(CandleSource, CandleComponent),
    Indicator(Indicator),
}

impl Parent {
    pub fn prices(source: &PriceSource) -> Self {
        Parent::Prices(source.clone())
    }

    /// Candle parent projected through the end price.
    pub fn candles(source: &CandleSource) -> Self {
        Parent::Candles(source.clone(), CandleComponent::End)
    }

    pub fn candles_component(source: &CandleSource, component: CandleComponent) -> Self {
        Parent::Candles(source.clone(), component)
    }

    pub fn indicator(indicator: &Indicator) -> Self {
        Parent::Indicator(indicator.clone())
    }

    pub fn interval(&self) -> Interval {
        match self {
            Parent::Prices(source) => source.interval(),
            Parent::Candles(source, _) => source.interval(),
            Parent::Indicator(indicator) => indicator.interval(),
        }
    }

    pub fn base_timestamp(&self) -> DateTime<Utc> {
        match self {
            Parent::Prices(source) => source.base_timestamp(),
            Parent::Candles(source, _) => source.base_timestamp(),
            Parent::Indicator(indicator) => indicator.base_timestamp(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Parent::Prices(source) => source.len(),
            Parent::Candles(source, _) => source.len(),
            Parent::Indicator(indicator) => indicator.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn node_id(&self) -> NodeId {
        match self {
            Parent::Prices(source) => source.node_id(),
            Parent::Candles(source, _) => source.node_id(),
            Parent::Indicator(indicator) => indicator.node_id(),
        }
    }

    pub(crate) fn subscribe(&self, callback: &RefreshCallback, receiver: Weak<dyn Disposable>) {
        match self {
            Parent::Prices(source) => source.register_indicator_dependent(callback, receiver),
            Parent::Candles(source, _) => source.register_indicator_dependent(callback, receiver),
            Parent::Indicator(indicator) => indicator.register_dependent(callback, receiver),
        }
    }

    pub(crate) fn unsubscribe(&self, callback: &RefreshCallback) {
        match self {
            Parent::Prices(source) => source.unsubscribe_indicators(callback),
            Parent::Candles(source, _) => source.unsubscribe_indicators(callback),
            Parent::Indicator(indicator) => indicator.unsubscribe_refresh(callback),
        }
    }

    /// The projected scalar rows `[start, stop)`.
    pub(crate) fn read_projected(&self, start: usize, stop: usize) -> Result<Vec<f64>> {
        use crate::domain::PricingValue;
        match self {
            Parent::Prices(source) => Ok(source
                .get_slice(start, stop)?
                .into_iter()
                .map(|price| price.project(CandleComponent::End))
                .collect()),
            Parent::Candles(source, component) => Ok(source
                .get_slice(start, stop)?
                .into_iter()
                .map(|candle| candle.project(*component))
                .collect()),
            Parent::Indicator(indicator) => indicator.get_slice(start, stop),
        }
    }

    pub(crate) fn value_projected(&self, index: usize) -> Result<f64> {
        Ok(self.read_projected(index, index + 1)?[0])
    }
}

impl From<&PriceSource> for Parent {
    fn from(source: &PriceSource) -> Self {
        Parent::prices(source)
    }
}

impl From<&CandleSource> for Parent {
    fn from(source: &CandleSource) -> Self {
        Parent::candles(source)
    }
}

impl From<&Indicator> for Parent {
    fn from(indicator: &Indicator) -> Self {
        Parent::indicator(indicator)
    }
}

/// The update routine of a concrete indicator: recompute rows `[start, end)`
/// into the owned float series. Routines must tolerate NaN inputs.
pub type UpdateFn = dyn FnMut(&mut Timelapse<f64>, usize, usize) -> Result<()>;

pub(crate) struct IndicatorNode {
    lapse: Timelapse<f64>,
    node_id: NodeId,
    on_refresh_indicators: Event,
    parents: Vec<Parent>,
    refresh_callback: Option<RefreshCallback>,
    max_requested_start: HashMap<NodeId, usize>,
    max_requested_end: HashMap<NodeId, usize>,
    update: Option<Box<UpdateFn>>,
    disposed: bool,
}

/// Handle to an indicator node. Clones share the node.
#[derive(Clone)]
pub struct Indicator {
    cell: Rc<RefCell<IndicatorNode>>,
}

impl Indicator {
    /// Wire a custom indicator over `parents` with `width` float columns.
    ///
    /// Construction subscribes to every parent and immediately replays each
    /// parent's full extent, so the indicator converges on existing data before
    /// the handle is returned.
    pub fn custom(parents: Vec<Parent>, width: usize, update: Box<UpdateFn>) -> Result<Self> {
        Self::build(parents, width, INDICATOR_CHUNK_ROWS, update)
    }

    pub(crate) fn build(
        parents: Vec<Parent>,
        width: usize,
        chunk_size: usize,
        update: Box<UpdateFn>,
    ) -> Result<Self> {
        if parents.is_empty() {
            return Err(SeriesError::InvalidArgument(
                "an indicator needs at least one broadcaster".to_string(),
            ));
        }
        let interval = parents[0].interval();
        if parents.iter().any(|parent| parent.interval() != interval) {
            return Err(SeriesError::InvalidArgument(
                "all broadcasters of an indicator must share one interval".to_string(),
            ));
        }
        if chunk_size < COMFORTABLE_CHUNK_ROWS {
            log::warn!(
                "indicator chunk size {} is small; ensure it fits the expected data volume",
                chunk_size
            );
        }
        let base_timestamp = parents
            .iter()
            .map(|parent| parent.base_timestamp())
            .max()
            .expect("at least one parent");
        let lapse = Timelapse::new(
            GrowingArray::new(chunk_size, width, f64::NAN)?,
            interval,
            base_timestamp,
        );

        let seeds: Vec<(NodeId, usize)> = parents
            .iter()
            .map(|parent| (parent.node_id(), parent.len()))
            .collect();
        let mut max_requested_start = HashMap::new();
        let mut max_requested_end = HashMap::new();
        for (id, _) in &seeds {
            max_requested_start.insert(*id, 0);
            max_requested_end.insert(*id, 0);
        }

        let cell = Rc::new(RefCell::new(IndicatorNode {
            lapse,
            node_id: NodeId::next(),
            on_refresh_indicators: Event::new(),
            parents,
            refresh_callback: None,
            max_requested_start,
            max_requested_end,
            update: Some(update),
            disposed: false,
        }));

        let weak = Rc::downgrade(&cell);
        let callback: RefreshCallback = Rc::new(move |dependency, start, end| {
            if let Some(cell) = weak.upgrade() {
                dependency_update(&cell, dependency, start, end);
            }
        });
        {
            let node = cell.borrow();
            let cell_dyn: Rc<dyn Disposable> = cell.clone();
            let receiver: Weak<dyn Disposable> = Rc::downgrade(&cell_dyn);
            for parent in &node.parents {
                parent.subscribe(&callback, receiver.clone());
            }
        }
        cell.borrow_mut().refresh_callback = Some(callback);

        let indicator = Indicator { cell };
        for (id, length) in seeds {
            dependency_update(&indicator.cell, id, 0, length);
        }
        Ok(indicator)
    }

    pub fn len(&self) -> usize {
        self.cell.borrow().lapse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn width(&self) -> usize {
        self.cell.borrow().lapse.width()
    }

    pub fn interval(&self) -> Interval {
        self.cell.borrow().lapse.interval()
    }

    pub fn base_timestamp(&self) -> DateTime<Utc> {
        self.cell.borrow().lapse.base_timestamp()
    }

    /// Copy of row `index`, one value per column.
    pub fn get(&self, index: usize) -> Result<Vec<f64>> {
        let node = self.cell.borrow();
        if node.disposed {
            return Err(SeriesError::Disposed);
        }
        node.lapse.get(index)
    }

    /// Row-major copy of rows `[start, stop)`.
    pub fn get_slice(&self, start: usize, stop: usize) -> Result<Vec<f64>> {
        let node = self.cell.borrow();
        if node.disposed {
            return Err(SeriesError::Disposed);
        }
        node.lapse.get_slice(start, stop)
    }

    /// First column of row `index`; the whole row for width-1 indicators.
    pub fn value_at(&self, index: usize) -> Result<f64> {
        Ok(self.get(index)?[0])
    }

    pub fn disposed(&self) -> bool {
        self.cell.borrow().disposed
    }

    /// Tear this indicator down: unsubscribe from every broadcaster, release the
    /// buffer and cascade to every subscribed dependent indicator. Idempotent.
    /// Must not be called from inside a refresh.
    pub fn dispose(&self) {
        self.cell.dispose_now();
    }

    /// Observe this indicator's refresh windows.
    pub fn subscribe_refresh(&self, callback: &RefreshCallback) {
        self.cell.borrow().on_refresh_indicators.register(callback);
    }

    pub fn unsubscribe_refresh(&self, callback: &RefreshCallback) {
        self.cell.borrow().on_refresh_indicators.unregister(callback);
    }

    pub(crate) fn node_id(&self) -> NodeId {
        self.cell.borrow().node_id
    }

    pub(crate) fn register_dependent(
        &self,
        callback: &RefreshCallback,
        receiver: Weak<dyn Disposable>,
    ) {
        self.cell
            .borrow()
            .on_refresh_indicators
            .register_dependent(callback, Some(receiver));
    }
}

/// One dependency reported new rows `[start, end)`: advance the watermarks,
/// recompute the joined span and broadcast it.
fn dependency_update(cell: &Rc<RefCell<IndicatorNode>>, dependency: NodeId, start: usize, end: usize) {
    let (origin, current_start, current_end) = {
        let mut node = cell.borrow_mut();
        if node.disposed {
            return;
        }

        let mark = node.max_requested_end.entry(dependency).or_insert(0);
        *mark = (*mark).max(end);
        let min_requested_end = node.max_requested_end.values().copied().min().unwrap_or(0);
        let current_end = min_requested_end.min(end);

        let mark = node.max_requested_start.entry(dependency).or_insert(0);
        *mark = (*mark).max(start);
        let min_requested_start = node.max_requested_start.values().copied().min().unwrap_or(0);
        let current_start = min_requested_start.min(start);

        let IndicatorNode { lapse, update, .. } = &mut *node;
        if let Some(update) = update.as_mut() {
            if let Err(error) = update(lapse, current_start, current_end) {
                log::error!(
                    "indicator update over [{}, {}) failed: {}",
                    current_start,
                    current_end,
                    error
                );
            }
        }
        (node.node_id, current_start, current_end)
    };

    let callbacks = cell.borrow().on_refresh_indicators.callbacks();
    for callback in callbacks {
        callback(origin, current_start, current_end);
    }
}

impl Disposable for RefCell<IndicatorNode> {
    fn dispose_now(&self) {
        let (parents, callback, dependents) = {
            let mut node = self.borrow_mut();
            if node.disposed {
                return;
            }
            node.disposed = true;
            (
                std::mem::take(&mut node.parents),
                node.refresh_callback.take(),
                node.on_refresh_indicators.dependents(),
            )
        };
        // Unsubscribe from every producer before touching the buffers, so a
        // producer firing concurrently with the teardown finds dead callbacks
        // instead of half-released state.
        if let Some(callback) = &callback {
            for parent in &parents {
                parent.unsubscribe(callback);
            }
        }
        {
            let mut node = self.borrow_mut();
            node.lapse.release();
            node.update = None;
        }
        drop(parents);
        for dependent in dependents {
            dependent.dispose_now();
        }
    }
}
