use std::{collections::HashMap, sync::Arc};

use tokio::sync::mpsc::{self, error::TrySendError};

use super::msg::{Message, OccupantInfo, RoomInfo, User};

pub(crate) type Outbound = mpsc::Sender<Arc<Message>>;

/// A live connection as the hub sees it. Holds the only sender of the
/// user's outbound channel, so dropping the occupant closes the channel.
#[derive(Debug)]
pub(crate) struct Occupant {
    user: User,
    outbound: Outbound,
}

impl Occupant {
    pub(crate) fn new(user: User, outbound: Outbound) -> Self {
        Self { user, outbound }
    }
}

/// Room state. Only ever touched from the hub's control loop.
#[derive(Debug)]
pub(crate) struct Room {
    id: String,
    name: String,
    occupants: HashMap<String, Occupant>,
}

impl Room {
    pub(crate) fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            occupants: HashMap::new(),
        }
    }

    /// Set-insert keyed by user id. Returns `false` and leaves the room
    /// untouched if the id is already present.
    pub(crate) fn add_occupant(&mut self, occupant: Occupant) -> bool {
        if self.occupants.contains_key(&occupant.user.id) {
            return false;
        }
        self.occupants.insert(occupant.user.id.clone(), occupant);
        true
    }

    pub(crate) fn is_occupied_by(&self, user: &User) -> bool {
        self.occupants
            .get(&user.id)
            .is_some_and(|o| o.user.conn_id == user.conn_id)
    }

    /// Removes `user` if this exact connection is the one present, closing
    /// its outbound channel. Yields a left notice only while others remain.
    pub(crate) fn remove_occupant(&mut self, user: &User) -> Option<Message> {
        if !self.is_occupied_by(user) {
            return None;
        }
        let occupant = self.occupants.remove(&user.id)?;
        drop(occupant.outbound);

        if self.occupants.is_empty() {
            None
        } else {
            Some(Message::left(&self.id, &occupant.user.username))
        }
    }

    /// Removes `user` without producing a notice, for a handle that never
    /// became a live connection.
    pub(crate) fn discard_occupant(&mut self, user: &User) {
        if self.is_occupied_by(user) {
            self.occupants.remove(&user.id);
        }
    }

    /// Offers `message` to every occupant without waiting. Returns the
    /// occupants that could not take it (full or closed channel).
    pub(crate) fn fan_out(&self, message: &Arc<Message>) -> Vec<User> {
        let mut lagging = Vec::new();
        for occupant in self.occupants.values() {
            match occupant.outbound.try_send(Arc::clone(message)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                    lagging.push(occupant.user.clone());
                }
            }
        }
        lagging
    }

    pub(crate) fn len(&self) -> usize {
        self.occupants.len()
    }

    pub(crate) fn info(&self) -> RoomInfo {
        RoomInfo {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }

    pub(crate) fn occupant_infos(&self) -> Vec<OccupantInfo> {
        let mut infos: Vec<_> = self
            .occupants
            .values()
            .map(|o| OccupantInfo {
                id: o.user.id.clone(),
                username: o.user.username.clone(),
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap};

    use proptest::prelude::*;
    use tokio::sync::mpsc::error::TryRecvError;

    use super::*;

    fn occupant(id: &str, capacity: usize) -> (User, Occupant, mpsc::Receiver<Arc<Message>>) {
        let user = User::new(id, format!("user{id}"), "r1");
        let (tx, rx) = mpsc::channel(capacity);
        (user.clone(), Occupant::new(user, tx), rx)
    }

    #[test]
    fn add_is_idempotent_by_user_id() {
        let mut room = Room::new("r1", "General");
        let (_, first, _rx1) = occupant("a", 4);
        let (_, second, mut rx2) = occupant("a", 4);

        assert!(room.add_occupant(first));
        assert!(!room.add_occupant(second));
        assert_eq!(room.len(), 1);
        // rejected handle's channel is closed right away
        assert_eq!(rx2.try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn removing_last_occupant_is_silent() {
        let mut room = Room::new("r1", "General");
        let (a, occ, mut rx) = occupant("a", 4);
        room.add_occupant(occ);

        assert_eq!(room.remove_occupant(&a), None);
        assert_eq!(room.len(), 0);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn removing_with_others_left_yields_notice() {
        let mut room = Room::new("r1", "General");
        let (a, occ_a, _rx_a) = occupant("a", 4);
        let (_, occ_b, _rx_b) = occupant("b", 4);
        room.add_occupant(occ_a);
        room.add_occupant(occ_b);

        let notice = room.remove_occupant(&a).unwrap();
        assert_eq!(notice, Message::left("r1", "usera"));
        assert_eq!(room.occupant_infos().len(), 1);
    }

    #[test]
    fn removing_absent_or_stale_handle_is_noop() {
        let mut room = Room::new("r1", "General");
        let (a, occ, _rx) = occupant("a", 4);
        room.add_occupant(occ);

        let stale = User::new("a", "usera", "r1");
        assert_eq!(room.remove_occupant(&stale), None);
        assert!(room.is_occupied_by(&a));

        let stranger = User::new("z", "userz", "r1");
        assert_eq!(room.remove_occupant(&stranger), None);
        assert_eq!(room.len(), 1);
    }

    #[test]
    fn fan_out_reaches_everyone_and_reports_laggards() {
        let mut room = Room::new("r1", "General");
        let (_, occ_a, mut rx_a) = occupant("a", 4);
        let (b, occ_b, rx_b) = occupant("b", 1);
        room.add_occupant(occ_a);
        room.add_occupant(occ_b);

        let first = Arc::new(Message::new("one", "r1", "usera"));
        assert!(room.fan_out(&first).is_empty());

        let second = Arc::new(Message::new("two", "r1", "usera"));
        assert_eq!(room.fan_out(&second), vec![b]);

        assert_eq!(rx_a.try_recv().unwrap().content, "one");
        assert_eq!(rx_a.try_recv().unwrap().content, "two");
        drop(rx_b);
    }

    #[test]
    fn occupant_listing_is_sorted() {
        let mut room = Room::new("r1", "General");
        let (_, occ_b, _rx_b) = occupant("b", 1);
        let (_, occ_a, _rx_a) = occupant("a", 1);
        room.add_occupant(occ_b);
        room.add_occupant(occ_a);

        let ids: Vec<_> = room.occupant_infos().into_iter().map(|o| o.id).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(room.info(), RoomInfo { id: "r1".into(), name: "General".into() });
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(&'static str),
        Remove(&'static str),
        StaleRemove(&'static str),
    }

    fn op() -> impl Strategy<Value = Op> {
        let id = prop_oneof![Just("a"), Just("b"), Just("c"), Just("d")];
        id.prop_flat_map(|id| prop_oneof![Just(Op::Add(id)), Just(Op::Remove(id)), Just(Op::StaleRemove(id))])
    }

    proptest! {
        #[test]
        fn occupants_track_a_set_of_user_ids(ops in proptest::collection::vec(op(), 0..64)) {
            let mut room = Room::new("r1", "General");
            let mut model = BTreeSet::new();
            let mut live: HashMap<&str, User> = HashMap::new();

            for op in ops {
                match op {
                    Op::Add(id) => {
                        let (user, occ, _rx) = occupant(id, 1);
                        let added = room.add_occupant(occ);
                        prop_assert_eq!(added, model.insert(id));
                        if added {
                            live.insert(id, user);
                        }
                    }
                    Op::Remove(id) => {
                        let notice = match live.remove(id) {
                            Some(user) => room.remove_occupant(&user),
                            None => room.remove_occupant(&User::new(id, format!("user{id}"), "r1")),
                        };
                        let was_present = model.remove(id);
                        let expect_notice = was_present && !model.is_empty();
                        prop_assert_eq!(notice, expect_notice.then(|| Message::left("r1", &format!("user{id}"))));
                    }
                    Op::StaleRemove(id) => {
                        // same user id, different connection
                        let stale = User::new(id, format!("user{id}"), "r1");
                        prop_assert_eq!(room.remove_occupant(&stale), None);
                    }
                }

                let ids: Vec<_> = room.occupant_infos().into_iter().map(|o| o.id).collect();
                let expected: Vec<_> = model.iter().map(|id| id.to_string()).collect();
                prop_assert_eq!(ids, expected);
                prop_assert_eq!(room.len(), model.len());
            }
        }
    }

    #[test]
    fn discarding_is_silent_and_exact() {
        let mut room = Room::new("r1", "General");
        let (a, occ_a, mut rx_a) = occupant("a", 4);
        let (_, occ_b, _rx_b) = occupant("b", 4);
        room.add_occupant(occ_a);
        room.add_occupant(occ_b);

        room.discard_occupant(&User::new("a", "usera", "r1"));
        assert!(room.is_occupied_by(&a));

        room.discard_occupant(&a);
        assert_eq!(room.len(), 1);
        assert_eq!(rx_a.try_recv(), Err(TryRecvError::Disconnected));
    }
}
