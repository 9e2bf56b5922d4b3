//! Selection boxes.
//!
//! Every active selection is a [`SelectionBox`]: one selection root transform
//! (SRT) placing the group on the board, and one sub-item transform (SIT) per
//! member placing that item inside the group. A member's effective board
//! transform is `SRT * SIT`, and it replaces the item's own board transform
//! for as long as the item is selected.
//!
//! [`LocalSelection`] is driven by this client's gestures, [`RemoteSelection`]
//! by notifications about another client. [`SelectionEngine`] tracks which
//! client holds what.
//!
//! Views and SRT watchers are never called from inside a mutation. Their
//! calls go through the box's [`CallbackQueue`] and run when it is flushed.

mod engine;

pub use engine::{ClientEntry, ConnectionState, LocalSelectionState, SelectionEngine};

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use kurbo::{Affine, Point, Rect, Vec2};

use crate::events::{CallbackQueue, Deferred, ExclusiveSlot};
use crate::items::{ClientId, ItemId};
use crate::protocol::{SelectionAddItems, TransformRecord};
use crate::state::{MutableState, State};
use crate::table::ItemTable;
use crate::transform::Transform;

/// Render-side representation of a selection box. All callbacks default to no-ops.
pub trait SelectionView {
    fn srt_changed(&mut self, _srt: Affine) {}
    fn item_added(&mut self, _id: ItemId, _sit: Affine) {}
    fn sit_changed(&mut self, _id: ItemId, _sit: Affine) {}
    fn item_removed(&mut self, _id: ItemId) {}
}

#[derive(Debug, Default)]
pub struct NullSelectionView;

impl SelectionView for NullSelectionView {}

/// Pre-existing state of the local selection, learned at bootstrap.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionInit {
    pub srt: Transform,
    pub items: Vec<TransformRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSelectionInit {
    pub id: ClientId,
    pub srt: Transform,
    pub items: Vec<TransformRecord>,
}

pub type LocalSelectionFactory = dyn Fn(Option<&SelectionInit>) -> Box<dyn SelectionView>;
pub type RemoteSelectionFactory = dyn Fn(&RemoteSelectionInit) -> Box<dyn SelectionView>;

/// Constructors for selection views, bound once by the render layer.
pub struct SelectionFactories {
    pub local: ExclusiveSlot<LocalSelectionFactory>,
    pub remote: ExclusiveSlot<RemoteSelectionFactory>,
}

impl SelectionFactories {
    pub fn new() -> Self {
        Self {
            local: ExclusiveSlot::new("local selection factory"),
            remote: ExclusiveSlot::new("remote selection factory"),
        }
    }
}

impl Default for SelectionFactories {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SelectionFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectionFactories")
            .field("local", &self.local)
            .field("remote", &self.remote)
            .finish()
    }
}

fn records_to_affine(records: &[TransformRecord]) -> Vec<(ItemId, Affine)> {
    records.iter().map(|(id, t)| (*id, t.to_affine())).collect()
}

/// The SRT/SIT machinery shared by local and remote selections.
pub struct SelectionBox {
    srt: Affine,
    published: Rc<MutableState<Affine>>,
    inverse_srt: State<Affine>,
    sits: HashMap<ItemId, Affine>,
    view: Deferred<dyn SelectionView>,
}

impl SelectionBox {
    fn new(view: Deferred<dyn SelectionView>) -> Self {
        let published = Rc::new(MutableState::new(Affine::IDENTITY));
        let inverse_srt = published.derived(|m| m.inverse());
        Self { srt: Affine::IDENTITY, published, inverse_srt, sits: HashMap::new(), view }
    }

    fn seeded(view: Deferred<dyn SelectionView>, srt: Transform, items: &[TransformRecord]) -> Self {
        let mut selection = Self::new(view);
        for (id, sit) in records_to_affine(items) {
            selection.insert(id, sit);
        }
        selection.set_srt(srt.to_affine());
        selection
    }

    pub fn srt(&self) -> Affine {
        self.srt
    }

    /// Observable SRT, for borders and handles. Updated when the callback
    /// queue is flushed.
    pub fn srt_state(&self) -> State<Affine> {
        self.published.as_readonly()
    }

    /// Maps board points into the selection's local frame. Published with
    /// [`SelectionBox::srt_state`].
    pub fn inverse_srt(&self) -> State<Affine> {
        self.inverse_srt.clone()
    }

    pub fn sit(&self, id: ItemId) -> Option<Affine> {
        self.sits.get(&id).copied()
    }

    /// `SRT * SIT` for a member.
    pub fn effective(&self, id: ItemId) -> Option<Affine> {
        self.sits.get(&id).map(|sit| self.srt() * *sit)
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.sits.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sits.is_empty()
    }

    /// Member ids in ascending order.
    pub fn ids(&self) -> Vec<ItemId> {
        let mut ids: Vec<ItemId> = self.sits.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Effective transforms of every member, in ascending id order.
    pub fn effective_transforms(&self) -> Vec<(ItemId, Affine)> {
        let srt = self.srt();
        self.ids().into_iter().map(|id| (id, srt * self.sits[&id])).collect()
    }

    fn set_srt(&mut self, srt: Affine) {
        self.srt = srt;
        let published = self.published.clone();
        self.view.queue().defer(move || published.set(srt));
        self.view.call(move |view| view.srt_changed(srt));
    }

    fn insert(&mut self, id: ItemId, sit: Affine) {
        if self.sits.insert(id, sit).is_some() {
            log::warn!("{} was already in the selection, replacing its transform", id);
            self.view.call(move |view| view.sit_changed(id, sit));
        } else {
            self.view.call(move |view| view.item_added(id, sit));
        }
    }

    /// Add members under a new SRT without moving the existing ones.
    ///
    /// Existing SITs are pre-multiplied by `new_srt⁻¹ * old_srt` first, then
    /// the new members are inserted, then the new SRT is adopted.
    fn add_from_transforms(&mut self, new_sits: &[(ItemId, Affine)], new_srt: Affine) {
        let adjust = new_srt.inverse() * self.srt();
        let existing: Vec<ItemId> = self.ids();
        for id in existing {
            if let Some(sit) = self.sits.get_mut(&id) {
                *sit = adjust * *sit;
                let sit = *sit;
                self.view.call(move |view| view.sit_changed(id, sit));
            }
        }
        for (id, sit) in new_sits {
            self.insert(*id, *sit);
        }
        self.set_srt(new_srt);
    }

    fn update_sits(&mut self, sits: &[(ItemId, Affine)]) {
        for (id, sit) in sits {
            match self.sits.get_mut(id) {
                Some(current) => {
                    *current = *sit;
                    let (id, sit) = (*id, *sit);
                    self.view.call(move |view| view.sit_changed(id, sit));
                }
                None => log::warn!("Ignoring transform for {}, not in this selection", id),
            }
        }
    }

    /// Remove a member, returning its effective transform.
    fn remove(&mut self, id: ItemId) -> Option<Affine> {
        let sit = self.sits.remove(&id)?;
        self.view.call(move |view| view.item_removed(id));
        Some(self.srt() * sit)
    }

    /// Remove every member, returning their effective transforms.
    fn drain_final_transforms(&mut self) -> Vec<(ItemId, Affine)> {
        let finals = self.effective_transforms();
        for (id, _) in &finals {
            let id = *id;
            self.sits.remove(&id);
            self.view.call(move |view| view.item_removed(id));
        }
        finals
    }

    /// Union of the members' bounds in the selection's local frame.
    pub fn local_bounds(&self, table: &ItemTable) -> Option<Rect> {
        self.sits
            .iter()
            .filter_map(|(id, sit)| table.get(*id).map(|e| e.item.bounds_with(*sit)))
            .reduce(|a, b| a.union(b))
    }

    /// Union of the members' bounds on the board.
    pub fn board_bounds(&self, table: &ItemTable) -> Option<Rect> {
        let srt = self.srt();
        self.sits
            .iter()
            .filter_map(|(id, sit)| table.get(*id).map(|e| e.item.bounds_with(srt * *sit)))
            .reduce(|a, b| a.union(b))
    }

    /// Whether a board point falls inside the selection's local bounds.
    pub fn hit_test(&self, table: &ItemTable, point: Point) -> bool {
        let local = self.srt.inverse() * point;
        self.local_bounds(table).is_some_and(|b| b.contains(local))
    }
}

impl fmt::Debug for SelectionBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectionBox")
            .field("srt", &self.srt())
            .field("sits", &self.sits)
            .finish_non_exhaustive()
    }
}

/// This client's own selection.
#[derive(Debug)]
pub struct LocalSelection {
    inner: SelectionBox,
}

impl LocalSelection {
    pub fn new(view: Deferred<dyn SelectionView>, init: Option<&SelectionInit>) -> Self {
        let inner = match init {
            Some(init) => SelectionBox::seeded(view, init.srt, &init.items),
            None => SelectionBox::new(view),
        };
        Self { inner }
    }

    /// Fold table items into the selection and build the payload announcing it.
    ///
    /// The new SRT is an axis-aligned translation to the centre of the combined
    /// bounds of the current members and the added items. Existing members
    /// keep their effective transform; added items keep their board transform.
    pub fn create_add_payload(&mut self, table: &ItemTable, ids: &[ItemId]) -> SelectionAddItems {
        let added: Vec<(ItemId, Affine)> = table
            .get_many(ids.iter().copied())
            .flatten()
            .map(|entry| (entry.id, entry.item.board_transform().to_affine()))
            .collect();

        let added_bounds = added
            .iter()
            .filter_map(|(id, _)| table.get(*id).map(|e| e.item.bounds()))
            .reduce(|a, b| a.union(b));
        let bounds = match (self.inner.board_bounds(table), added_bounds) {
            (Some(a), Some(b)) => a.union(b),
            (Some(r), None) | (None, Some(r)) => r,
            (None, None) => Rect::ZERO,
        };

        let new_srt = Affine::translate(bounds.center().to_vec2());
        let inverse = new_srt.inverse();
        let adjust = inverse * self.inner.srt();

        let mut records: Vec<(ItemId, Transform, Transform)> = self
            .inner
            .ids()
            .into_iter()
            .map(|id| {
                let old = self.inner.sits[&id];
                (id, Transform::from_affine(old), Transform::from_affine(adjust * old))
            })
            .collect();

        let new_sits: Vec<(ItemId, Affine)> = added.iter().map(|(id, board)| (*id, inverse * *board)).collect();
        records.extend(
            added
                .iter()
                .zip(&new_sits)
                .map(|((id, board), (_, sit))| (*id, Transform::from_affine(*board), Transform::from_affine(*sit))),
        );

        self.inner.add_from_transforms(&new_sits, new_srt);

        SelectionAddItems { items: records, new_srt: Transform::from_affine(new_srt) }
    }

    /// Move the whole group. Member SITs are untouched.
    pub fn move_to(&mut self, srt: Affine) {
        self.inner.set_srt(srt);
    }

    /// Translate the group by `delta` in board space.
    pub fn translate_by(&mut self, delta: Vec2) {
        let srt = self.inner.srt().then_translate(delta);
        self.inner.set_srt(srt);
    }

    pub(crate) fn drain_final_transforms(&mut self) -> Vec<(ItemId, Affine)> {
        self.inner.drain_final_transforms()
    }

    pub(crate) fn remove(&mut self, id: ItemId) -> Option<Affine> {
        self.inner.remove(id)
    }
}

impl std::ops::Deref for LocalSelection {
    type Target = SelectionBox;

    fn deref(&self) -> &SelectionBox {
        &self.inner
    }
}

/// Another client's selection, mirrored from notifications.
#[derive(Debug)]
pub struct RemoteSelection {
    id: ClientId,
    inner: SelectionBox,
}

impl RemoteSelection {
    pub fn new(view: Deferred<dyn SelectionView>, init: &RemoteSelectionInit) -> Self {
        Self { id: init.id, inner: SelectionBox::seeded(view, init.srt, &init.items) }
    }

    pub fn client(&self) -> ClientId {
        self.id
    }

    pub fn add_items(&mut self, new_sits: &[TransformRecord], new_srt: Transform) {
        self.inner.add_from_transforms(&records_to_affine(new_sits), new_srt.to_affine());
    }

    /// Adopt a new SRT, and any renormalized SITs sent with it.
    pub fn move_items(&mut self, new_srt: Transform, new_sits: Option<&[TransformRecord]>) {
        self.inner.set_srt(new_srt.to_affine());
        if let Some(sits) = new_sits {
            self.inner.update_sits(&records_to_affine(sits));
        }
    }

    pub(crate) fn remove(&mut self, id: ItemId) -> Option<Affine> {
        self.inner.remove(id)
    }
}

impl std::ops::Deref for RemoteSelection {
    type Target = SelectionBox;

    fn deref(&self) -> &SelectionBox {
        &self.inner
    }
}
