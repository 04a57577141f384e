use crate::api::{InitialWorld, WorldApi};
use crate::config::ClientConfig;
use crate::dispatcher::{Dispatcher, HandlerResult};
use crate::game::{Camera, InteractOutcome, MoveOutcome, MovementController};
use crate::input::{InputCommand, InputManager};
use crate::notices::{Profile, Toast, ToastLevel};
use crate::store::SessionState;
use crate::transport::{ConnectionManager, Connector, TransportEvent};
use log::{debug, info, trace, warn};
use serde_json::Value;
use shared::{
    AchievementUnlocked, ClientIntent, DmMessage, Friend, FriendRequest, GameClock, GuildInvitation,
    InboxNotification, InteractionResult, LevelUp, Npc, NpcPositionUpdate, Player, PlayerLeft,
    PlayerPositionUpdate, Pong, Position, QuestUpdate, ResyncRequest, SeasonChange, TargetRef,
    UserStatus, WorldObject, WorldObjectUpdate, WorldSnapshot, CLEAN_CLOSE_CODE,
};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};

/// Read-only copy of the session handed to the viewer.
#[derive(Debug, Clone, Default)]
pub struct SessionView {
    pub local_player: Option<Player>,
    pub players: Vec<Player>,
    pub npcs: Vec<Npc>,
    pub objects: Vec<WorldObject>,
    pub clock: GameClock,
    pub camera: Camera,
    pub connected: bool,
    pub toasts: Vec<Toast>,
    pub quest: Option<QuestUpdate>,
    pub unread: usize,
    pub profile: Profile,
    pub online_friends: Vec<Friend>,
}

/// One logged-in player's realtime session: the socket, the world it feeds
/// and the local controller writing into that world.
pub struct Session<C: Connector> {
    transport: ConnectionManager<C, SessionState>,
    state: SessionState,
    controller: MovementController,
    input: InputManager,
    config: ClientConfig,
    last_envelope_at: Option<String>,
}

impl<C: Connector> Session<C> {
    pub fn new(connector: C, config: ClientConfig) -> Self {
        let transport = ConnectionManager::new(
            connector,
            config.ws_base_url.clone(),
            config.transport.clone(),
        );

        Self {
            transport,
            state: SessionState::new(config.controller.map_size),
            controller: MovementController::new(config.controller.clone()),
            input: InputManager::new(&config.controller),
            config,
            last_envelope_at: None,
        }
    }

    /// Loads the world over REST, falling back to the offline village.
    pub async fn bootstrap(&mut self, api: &WorldApi) {
        match api.initial_world().await {
            Ok(world) => {
                info!("Loaded zone {}", self.config.zone);
                self.seed(world);
            }
            Err(e) => {
                warn!("Could not load world ({}), using offline village", e);
                self.seed(InitialWorld::offline());
            }
        }
    }

    pub fn seed(&mut self, world: InitialWorld) {
        self.state.world.replace_world(world.snapshot);
        self.state.world.set_local_player(Player::new(
            self.config.player_id.clone(),
            self.config.username.clone(),
            world.position,
        ));
        self.controller.recenter(world.position);
    }

    pub fn connect(&mut self, token: &str) {
        if self.transport.dispatcher_mut().is_empty() {
            install_handlers(self.transport.dispatcher_mut());
        }
        self.transport.connect(token);
    }

    /// Closes the socket and forgets the world.
    pub async fn disconnect(&mut self) {
        self.transport.disconnect().await;
        self.state.world.clear();
        self.state.notices.clear();
        self.input.release();
        self.last_envelope_at = None;
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn transport(&self) -> &ConnectionManager<C, SessionState> {
        &self.transport
    }

    pub fn input_mut(&mut self) -> &mut InputManager {
        &mut self.input
    }

    pub async fn move_player(&mut self, direction: shared::Direction) -> MoveOutcome {
        let outcome = self
            .controller
            .try_move(&mut self.state, direction, Instant::now());
        if let MoveOutcome::Moved(intent) = &outcome {
            self.transport
                .send_intent(&ClientIntent::Move(intent.clone()))
                .await;
        }
        outcome
    }

    pub async fn interact(&mut self, target: &TargetRef) -> InteractOutcome {
        let outcome = self.controller.interact(&mut self.state, target);
        if let InteractOutcome::Sent(intent) = &outcome {
            self.transport
                .send_intent(&ClientIntent::Interact(intent.clone()))
                .await;
        }
        outcome
    }

    pub async fn interact_at(&mut self, position: Position) -> Option<InteractOutcome> {
        let target = self.state.world.target_at(position)?;
        Some(self.interact(&target).await)
    }

    /// Waits for and applies the next transport event.
    pub async fn pump(&mut self) -> TransportEvent {
        let event = self.transport.next_event().await;
        self.handle_transport_event(&event).await;
        event
    }

    pub async fn handle_transport_event(&mut self, event: &TransportEvent) {
        match event {
            TransportEvent::Opened { reconnected } => {
                if *reconnected {
                    let resync = ClientIntent::Resync(ResyncRequest {
                        zone: self.config.zone.clone(),
                        since: self.last_envelope_at.clone(),
                    });
                    info!("Reconnected, requesting resync since {:?}", self.last_envelope_at);
                    self.transport.send_intent(&resync).await;
                }
            }
            TransportEvent::Message(envelope) => {
                if let Some(timestamp) = &envelope.timestamp {
                    self.last_envelope_at = Some(timestamp.clone());
                }
                self.transport.dispatch(envelope, &mut self.state);
            }
            TransportEvent::Closed { code, reconnect_in } => {
                self.state.world.clear_remote_players();
                if reconnect_in.is_none() && *code != Some(CLEAN_CLOSE_CODE) {
                    self.state.notices.push_toast(
                        ToastLevel::Error,
                        "Connection Lost",
                        "Realtime updates stopped. Reconnect to continue.",
                    );
                }
            }
        }
    }

    /// Returns false when the loop should stop.
    pub async fn handle_command(&mut self, command: InputCommand) -> bool {
        match command {
            InputCommand::Held(keys) => self.input.set_keys(keys),
            InputCommand::Joystick { dx, dy } => self.input.set_joystick(dx, dy),
            InputCommand::Interact(target) => {
                self.interact(&target).await;
            }
            InputCommand::InteractAt(position) => {
                self.interact_at(position).await;
            }
            InputCommand::DismissToast => {
                self.state.notices.dismiss_oldest_toast();
            }
            InputCommand::MarkInboxRead => self.state.notices.mark_all_read(),
            InputCommand::Quit => return false,
        }
        true
    }

    /// One fixed input tick: settle the moving flag, expire notices, then
    /// step in the held direction if any.
    pub async fn tick(&mut self, now: Instant) {
        self.controller.settle(&mut self.state, now);
        self.state.notices.expire(now);
        if let Some(direction) = self.input.direction() {
            self.move_player(direction).await;
        }
    }

    pub fn view(&self) -> SessionView {
        let world = &self.state.world;
        let notices = &self.state.notices;
        SessionView {
            local_player: world.local_player().cloned(),
            players: world.players().cloned().collect(),
            npcs: world.npcs().cloned().collect(),
            objects: world.objects().cloned().collect(),
            clock: world.clock().clone(),
            camera: self.controller.camera(),
            connected: self.transport.is_connected(),
            toasts: notices.toasts().cloned().collect(),
            quest: notices.quest_popup().map(|popup| popup.update.clone()),
            unread: notices.unread_count(),
            profile: notices.profile(),
            online_friends: notices.online_friends().to_vec(),
        }
    }

    /// Runs until `Quit` or until every command sender is gone, then disconnects.
    pub async fn run(
        &mut self,
        mut commands: mpsc::Receiver<InputCommand>,
        views: Option<watch::Sender<SessionView>>,
    ) {
        let mut input_interval = interval(self.config.controller.input_tick);
        input_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = self.transport.next_event() => {
                    self.handle_transport_event(&event).await;
                },

                command = commands.recv() => {
                    let keep_running = match command {
                        Some(command) => self.handle_command(command).await,
                        None => false,
                    };
                    if !keep_running {
                        break;
                    }
                },

                _ = input_interval.tick() => {
                    self.tick(Instant::now()).await;
                },
            }

            if let Some(views) = &views {
                views.send_replace(self.view());
            }
        }

        info!("Session loop finished");
        self.disconnect().await;
    }
}

fn install_handlers(dispatcher: &mut Dispatcher<SessionState>) {
    dispatcher.on(on_player_position);
    dispatcher.on(on_player_left);
    dispatcher.on(on_world_object_update);
    dispatcher.on(on_npc_position);
    dispatcher.on(on_time_update);
    dispatcher.on(on_season_change);
    dispatcher.on(on_interaction_result);
    dispatcher.on(on_quest_update);
    dispatcher.on(on_friend_request);
    dispatcher.on(on_achievement);
    dispatcher.on(on_level_up);
    dispatcher.on(on_user_status);
    dispatcher.on(on_dm_message);
    dispatcher.on(on_guild_invitation);
    dispatcher.on(on_notification);
    dispatcher.on(on_world_snapshot);
    dispatcher.on(on_pong);
}

fn on_player_position(state: &mut SessionState, update: &PlayerPositionUpdate) -> HandlerResult {
    state.world.apply_player_update(update);
    Ok(())
}

fn on_player_left(state: &mut SessionState, left: &PlayerLeft) -> HandlerResult {
    if state.world.remove_player(&left.player_id).is_some() {
        debug!("Player {} left", left.player_id);
    }
    Ok(())
}

fn on_world_object_update(state: &mut SessionState, update: &WorldObjectUpdate) -> HandlerResult {
    state.world.apply_object_update(update)?;
    Ok(())
}

fn on_npc_position(state: &mut SessionState, update: &NpcPositionUpdate) -> HandlerResult {
    state.world.apply_npc_update(update);
    Ok(())
}

fn on_time_update(state: &mut SessionState, clock: &GameClock) -> HandlerResult {
    state.world.set_clock(clock.clone());
    Ok(())
}

fn on_season_change(state: &mut SessionState, change: &SeasonChange) -> HandlerResult {
    state.world.set_season(change.season);
    Ok(())
}

fn on_interaction_result(state: &mut SessionState, result: &InteractionResult) -> HandlerResult {
    if let Some(message) = &result.message {
        let level = if result.success {
            ToastLevel::Info
        } else {
            ToastLevel::Warning
        };
        state.notices.push_toast(level, "Interaction", message.clone());
    }
    Ok(())
}

fn on_quest_update(state: &mut SessionState, update: &QuestUpdate) -> HandlerResult {
    state.notices.show_quest(update.clone());
    Ok(())
}

fn on_friend_request(state: &mut SessionState, request: &FriendRequest) -> HandlerResult {
    state.notices.notify(
        "friend_request",
        "Friend Request",
        format!("{} sent you a friend request", request.username),
        Value::Object(request.extra.clone()),
    );
    Ok(())
}

fn on_achievement(state: &mut SessionState, achievement: &AchievementUnlocked) -> HandlerResult {
    state.notices.push_toast(
        ToastLevel::Success,
        "Achievement Unlocked!",
        format!("You earned: {}", achievement.title),
    );
    Ok(())
}

fn on_level_up(state: &mut SessionState, level_up: &LevelUp) -> HandlerResult {
    state.notices.set_level(level_up.new_level, level_up.new_exp);
    state.notices.push_toast(
        ToastLevel::Success,
        "Level Up!",
        format!("Congratulations! You reached level {}", level_up.new_level),
    );
    Ok(())
}

fn on_user_status(state: &mut SessionState, status: &UserStatus) -> HandlerResult {
    state.notices.set_online_friends(status.online_friends.clone());
    Ok(())
}

fn on_dm_message(state: &mut SessionState, dm: &DmMessage) -> HandlerResult {
    state.notices.notify(
        "dm_message",
        "New Message",
        format!("{}: {}", dm.from, dm.message),
        Value::Object(dm.extra.clone()),
    );
    Ok(())
}

fn on_guild_invitation(state: &mut SessionState, invitation: &GuildInvitation) -> HandlerResult {
    state.notices.notify(
        "guild_invitation",
        "Guild Invitation",
        format!("You've been invited to join {}", invitation.guild_name),
        Value::Object(invitation.extra.clone()),
    );
    Ok(())
}

fn on_notification(state: &mut SessionState, notification: &InboxNotification) -> HandlerResult {
    state.notices.push_inbox(notification.clone());
    Ok(())
}

fn on_world_snapshot(state: &mut SessionState, snapshot: &WorldSnapshot) -> HandlerResult {
    info!(
        "World snapshot: {} players, {} npcs, {} objects",
        snapshot.players.len(),
        snapshot.npcs.len(),
        snapshot.objects.len()
    );
    state.world.replace_world(snapshot.clone());
    Ok(())
}

fn on_pong(_state: &mut SessionState, _pong: &Pong) -> HandlerResult {
    trace!("pong");
    Ok(())
}
