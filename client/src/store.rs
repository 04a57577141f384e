//! Client-side mirror of the world: players, NPCs, objects and the game clock

use crate::notices::Notices;
use log::{debug, warn};
use shared::{
    GameClock, Npc, NpcPositionUpdate, Player, PlayerPositionUpdate, Position, Season, TargetRef,
    WorldObject, WorldObjectUpdate, WorldSnapshot, MAP_HEIGHT, MAP_WIDTH,
};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct WorldStore {
    map_size: (i32, i32),
    local_player: Option<Player>,
    players: BTreeMap<String, Player>,
    npcs: BTreeMap<String, Npc>,
    objects: BTreeMap<String, WorldObject>,
    clock: GameClock,
}

impl WorldStore {
    pub fn new(map_size: (i32, i32)) -> Self {
        Self {
            map_size,
            local_player: None,
            players: BTreeMap::new(),
            npcs: BTreeMap::new(),
            objects: BTreeMap::new(),
            clock: GameClock::default(),
        }
    }

    pub fn map_size(&self) -> (i32, i32) {
        self.map_size
    }

    fn clamp(&self, position: Position) -> Position {
        position.clamped(self.map_size.0, self.map_size.1)
    }

    pub fn set_local_player(&mut self, mut player: Player) {
        player.position = self.clamp(player.position);
        self.players.remove(&player.id);
        self.local_player = Some(player);
    }

    pub fn local_player(&self) -> Option<&Player> {
        self.local_player.as_ref()
    }

    pub(crate) fn local_player_mut(&mut self) -> Option<&mut Player> {
        self.local_player.as_mut()
    }

    fn is_local(&self, id: &str) -> bool {
        self.local_player.as_ref().is_some_and(|p| p.id == id)
    }

    /// Merges a position delta into a remote player, inserting unknown ids.
    ///
    /// Echoes of the local player are ignored. Returns whether anything changed.
    pub fn apply_player_update(&mut self, update: &PlayerPositionUpdate) -> bool {
        if self.is_local(&update.player_id) {
            return false;
        }

        let position = self.clamp(Position::new(update.pos_x, update.pos_y));
        let player = self
            .players
            .entry(update.player_id.clone())
            .or_insert_with(|| {
                debug!("New player {}", update.player_id);
                Player::new(update.player_id.clone(), update.player_id.clone(), position)
            });

        player.position = position;
        if let Some(username) = &update.username {
            player.username = username.clone();
        }
        if let Some(direction) = update.direction {
            player.direction = direction;
        }
        if let Some(is_moving) = update.is_moving {
            player.is_moving = is_moving;
        }
        true
    }

    pub fn remove_player(&mut self, id: &str) -> Option<Player> {
        self.players.remove(id)
    }

    /// Unknown NPCs are added as non-interactive placeholders.
    pub fn apply_npc_update(&mut self, update: &NpcPositionUpdate) {
        let position = self.clamp(Position::new(update.pos_x, update.pos_y));
        self.npcs
            .entry(update.npc_id.clone())
            .or_insert_with(|| {
                let mut npc = Npc::new(update.npc_id.clone(), update.npc_id.clone(), position);
                npc.can_interact = false;
                npc
            })
            .position = position;
    }

    /// Unknown object ids are ignored. A change to `id` moves the entry to
    /// its new key.
    pub fn apply_object_update(
        &mut self,
        update: &WorldObjectUpdate,
    ) -> Result<bool, serde_json::Error> {
        let (width, height) = self.map_size;
        let Some(object) = self.objects.get_mut(&update.object_id) else {
            debug!("Update for unknown object {}", update.object_id);
            return Ok(false);
        };
        object.apply_changes(&update.changes)?;
        object.position = object.position.clamped(width, height);

        if object.id != update.object_id {
            if let Some(object) = self.objects.remove(&update.object_id) {
                debug!("Object {} renamed to {}", update.object_id, object.id);
                if self.objects.insert(object.id.clone(), object).is_some() {
                    warn!("Renamed object replaced an existing entry");
                }
            }
        }
        Ok(true)
    }

    pub fn upsert_npc(&mut self, mut npc: Npc) {
        npc.position = self.clamp(npc.position);
        self.npcs.insert(npc.id.clone(), npc);
    }

    pub fn upsert_object(&mut self, mut object: WorldObject) {
        object.position = self.clamp(object.position);
        self.objects.insert(object.id.clone(), object);
    }

    pub fn upsert_player(&mut self, mut player: Player) {
        if self.is_local(&player.id) {
            return;
        }
        player.position = self.clamp(player.position);
        self.players.insert(player.id.clone(), player);
    }

    pub fn set_clock(&mut self, clock: GameClock) {
        self.clock = clock;
    }

    pub fn set_season(&mut self, season: Season) {
        self.clock.season = season;
    }

    pub fn clock(&self) -> &GameClock {
        &self.clock
    }

    /// Swaps in an authoritative snapshot. The local player is kept.
    pub fn replace_world(&mut self, snapshot: WorldSnapshot) {
        self.players.clear();
        self.npcs.clear();
        self.objects.clear();

        for player in snapshot.players {
            self.upsert_player(player);
        }
        for npc in snapshot.npcs {
            self.upsert_npc(npc);
        }
        for object in snapshot.objects {
            self.upsert_object(object);
        }
        if let Some(clock) = snapshot.time {
            self.clock = clock;
        }
    }

    pub fn clear_remote_players(&mut self) {
        self.players.clear();
    }

    pub fn clear(&mut self) {
        *self = Self::new(self.map_size);
    }

    /// Objects and NPCs block movement. Players never do.
    pub fn is_blocked(&self, position: Position) -> bool {
        self.objects.values().any(|o| o.position == position)
            || self.npcs.values().any(|n| n.position == position)
    }

    /// The NPC or object occupying `position`, NPCs first.
    pub fn target_at(&self, position: Position) -> Option<TargetRef> {
        if let Some(npc) = self.npcs.values().find(|n| n.position == position) {
            return Some(TargetRef::Npc(npc.id.clone()));
        }
        self.objects
            .values()
            .find(|o| o.position == position)
            .map(|o| TargetRef::Object(o.id.clone()))
    }

    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.get(id)
    }

    pub fn npc(&self, id: &str) -> Option<&Npc> {
        self.npcs.get(id)
    }

    pub fn object(&self, id: &str) -> Option<&WorldObject> {
        self.objects.get(id)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn npcs(&self) -> impl Iterator<Item = &Npc> {
        self.npcs.values()
    }

    pub fn objects(&self) -> impl Iterator<Item = &WorldObject> {
        self.objects.values()
    }
}

impl Default for WorldStore {
    fn default() -> Self {
        Self::new((MAP_WIDTH, MAP_HEIGHT))
    }
}

/// Everything dispatcher handlers are allowed to mutate.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub world: WorldStore,
    pub notices: Notices,
}

impl SessionState {
    pub fn new(map_size: (i32, i32)) -> Self {
        Self {
            world: WorldStore::new(map_size),
            notices: Notices::new(),
        }
    }
}
