use crate::game::{Camera, FarmStage};
use crate::input::{HeldKeys, InputCommand};
use crate::network::SessionView;
use crate::notices::{Toast, ToastLevel};
use macroquad::prelude::*;
use shared::{Position, QuestUpdate, WorldObject, WorldObjectKind, TILE_SIZE};

const HUD_HEIGHT: f32 = 28.0;

/// Screen pixel to grid cell, given the camera's top-left tile.
pub fn screen_to_cell(camera: Camera, x: f32, y: f32) -> Position {
    Position::new(
        (x / TILE_SIZE + camera.x).floor() as i32,
        ((y - HUD_HEIGHT) / TILE_SIZE + camera.y).floor() as i32,
    )
}

pub fn cell_to_screen(camera: Camera, cell: Position) -> (f32, f32) {
    (
        (cell.x as f32 - camera.x) * TILE_SIZE,
        (cell.y as f32 - camera.y) * TILE_SIZE + HUD_HEIGHT,
    )
}

pub fn object_color(object: &WorldObject) -> Color {
    match object.kind {
        WorldObjectKind::Tree => Color::from_rgba(34, 139, 34, 255),
        WorldObjectKind::Building => Color::from_rgba(139, 90, 43, 255),
        WorldObjectKind::Chest => Color::from_rgba(218, 165, 32, 255),
        WorldObjectKind::Sign => Color::from_rgba(210, 180, 140, 255),
        WorldObjectKind::Rock => Color::from_rgba(128, 128, 128, 255),
        WorldObjectKind::Unknown => Color::from_rgba(70, 70, 90, 255),
        WorldObjectKind::FarmPlot => match FarmStage::of(object) {
            FarmStage::Empty => Color::from_rgba(101, 67, 33, 255),
            FarmStage::Seeded => Color::from_rgba(124, 185, 80, 255),
            FarmStage::Mature => Color::from_rgba(46, 160, 67, 255),
        },
    }
}

fn toast_color(level: ToastLevel) -> Color {
    match level {
        ToastLevel::Success => Color::from_rgba(46, 160, 67, 230),
        ToastLevel::Info => Color::from_rgba(0, 120, 215, 230),
        ToastLevel::Warning => Color::from_rgba(210, 140, 0, 230),
        ToastLevel::Error => Color::from_rgba(200, 40, 40, 230),
    }
}

pub struct Renderer {
    width: f32,
    height: f32,
    held: HeldKeys,
}

impl Renderer {
    pub fn new(width: usize, height: usize) -> Self {
        Renderer {
            width: width as f32,
            height: height as f32,
            held: HeldKeys::default(),
        }
    }

    /// Commands for this frame: held-key changes, clicks and hotkeys.
    pub fn sample_input(&mut self, view: &SessionView) -> Vec<InputCommand> {
        let mut commands = Vec::new();

        let held = HeldKeys {
            up: is_key_down(KeyCode::W) || is_key_down(KeyCode::Up),
            down: is_key_down(KeyCode::S) || is_key_down(KeyCode::Down),
            left: is_key_down(KeyCode::A) || is_key_down(KeyCode::Left),
            right: is_key_down(KeyCode::D) || is_key_down(KeyCode::Right),
        };
        if held != self.held {
            self.held = held;
            commands.push(InputCommand::Held(held));
        }

        if is_mouse_button_pressed(MouseButton::Left) {
            let (x, y) = mouse_position();
            if y > HUD_HEIGHT {
                commands.push(InputCommand::InteractAt(screen_to_cell(view.camera, x, y)));
            }
        }

        if is_key_pressed(KeyCode::T) {
            commands.push(InputCommand::DismissToast);
        }
        if is_key_pressed(KeyCode::I) {
            commands.push(InputCommand::MarkInboxRead);
        }
        if is_key_pressed(KeyCode::Escape) {
            commands.push(InputCommand::Quit);
        }

        commands
    }

    pub fn render(&mut self, view: &SessionView) {
        clear_background(Color::from_rgba(96, 160, 72, 255));

        self.draw_grid();

        for object in &view.objects {
            self.draw_cell(view.camera, object.position, object_color(object), "");
        }
        for npc in &view.npcs {
            self.draw_cell(
                view.camera,
                npc.position,
                Color::from_rgba(147, 112, 219, 255),
                &npc.name,
            );
        }
        for player in &view.players {
            self.draw_cell(
                view.camera,
                player.position,
                Color::from_rgba(255, 68, 68, 255),
                &player.username,
            );
        }
        if let Some(player) = &view.local_player {
            self.draw_cell(view.camera, player.position, GREEN, &player.username);
        }

        self.draw_hud(view);
        self.draw_toasts(&view.toasts);
        if let Some(quest) = &view.quest {
            self.draw_quest(quest);
        }
    }

    fn draw_grid(&self) {
        let line = Color::from_rgba(0, 0, 0, 30);
        let mut x = 0.0;
        while x <= self.width {
            draw_line(x, HUD_HEIGHT, x, self.height, 1.0, line);
            x += TILE_SIZE;
        }
        let mut y = HUD_HEIGHT;
        while y <= self.height {
            draw_line(0.0, y, self.width, y, 1.0, line);
            y += TILE_SIZE;
        }
    }

    fn draw_cell(&self, camera: Camera, cell: Position, color: Color, label: &str) {
        let (x, y) = cell_to_screen(camera, cell);
        if x + TILE_SIZE < 0.0 || y < HUD_HEIGHT || x > self.width || y > self.height {
            return;
        }

        draw_rectangle(x + 2.0, y + 2.0, TILE_SIZE - 4.0, TILE_SIZE - 4.0, color);
        draw_rectangle_lines(x + 2.0, y + 2.0, TILE_SIZE - 4.0, TILE_SIZE - 4.0, 1.0, WHITE);

        if !label.is_empty() {
            draw_text(label, x, y - 2.0, 14.0, WHITE);
        }
    }

    fn draw_hud(&self, view: &SessionView) {
        draw_rectangle(0.0, 0.0, self.width, HUD_HEIGHT, Color::from_rgba(26, 26, 26, 230));

        let connection_color = if view.connected { GREEN } else { RED };
        draw_rectangle(10.0, 10.0, 8.0, 8.0, connection_color);

        let clock = &view.clock;
        let hud = format!(
            "Year {} {:?} Day {}  {}   Lv {} ({} xp)   Inbox {}   Friends {}",
            clock.year,
            clock.season,
            clock.day,
            clock.formatted_time(),
            view.profile.level,
            view.profile.exp,
            view.unread,
            view.online_friends.len(),
        );
        draw_text(&hud, 26.0, 19.0, 18.0, WHITE);
    }

    fn draw_toasts(&self, toasts: &[Toast]) {
        let width = 300.0;
        let height = 44.0;
        let x = self.width - width - 10.0;

        for (i, toast) in toasts.iter().enumerate() {
            let y = HUD_HEIGHT + 10.0 + i as f32 * (height + 6.0);
            draw_rectangle(x, y, width, height, toast_color(toast.level));
            draw_text(&toast.title, x + 8.0, y + 17.0, 18.0, WHITE);
            draw_text(&toast.message, x + 8.0, y + 35.0, 14.0, WHITE);
        }
    }

    fn draw_quest(&self, quest: &QuestUpdate) {
        let width = 360.0;
        let height = 70.0;
        let x = (self.width - width) / 2.0;
        let y = self.height - height - 20.0;

        draw_rectangle(x, y, width, height, Color::from_rgba(40, 30, 70, 240));
        draw_rectangle_lines(x, y, width, height, 2.0, GOLD);
        draw_text(&format!("Quest {:?}", quest.kind), x + 10.0, y + 20.0, 16.0, GOLD);
        draw_text(&quest.title, x + 10.0, y + 40.0, 20.0, WHITE);
        draw_text(&quest.message, x + 10.0, y + 60.0, 14.0, WHITE);
    }
}
