use crate::game::{FeatureToggles, RenderView};
use macroquad::prelude::*;
use shared::{PlayerState, World, PLAYER_SIZE};

pub struct Renderer {
    world: World,
}

impl Renderer {
    pub fn new(world: World) -> Self {
        Renderer { world }
    }

    pub fn render(&mut self, view: &RenderView) {
        clear_background(Color::from_rgba(26, 26, 26, 255));

        self.draw_world();

        for (id, position) in &view.remotes {
            self.draw_player(position, Color::from_rgba(255, 68, 68, 255));
            self.draw_player_id(*id, position);
        }

        self.draw_player(&view.local, GREEN);
        self.draw_player_id(view.session_id, &view.local);

        self.draw_ui(view);
    }

    fn draw_world(&mut self) {
        draw_rectangle_lines(
            0.0,
            0.0,
            self.world.width,
            self.world.height,
            2.0,
            Color::from_rgba(68, 68, 68, 255),
        );

        for building in &self.world.buildings {
            draw_rectangle(
                building.x,
                building.y,
                building.width,
                building.height,
                Color::from_rgba(68, 68, 68, 255),
            );
        }
    }

    fn draw_player(&mut self, player: &PlayerState, color: Color) {
        draw_rectangle(player.x, player.y, PLAYER_SIZE, PLAYER_SIZE, color);

        draw_rectangle_lines(player.x, player.y, PLAYER_SIZE, PLAYER_SIZE, 2.0, WHITE);
    }

    fn draw_player_id(&mut self, id: u32, player: &PlayerState) {
        let id_color = match id % 8 {
            0 => WHITE,
            1 => RED,
            2 => GREEN,
            3 => BLUE,
            4 => YELLOW,
            5 => MAGENTA,
            6 => Color::from_rgba(0, 255, 255, 255),
            _ => Color::from_rgba(136, 136, 136, 255),
        };

        let id_x = player.x + PLAYER_SIZE / 2.0 - 2.0;
        let id_y = player.y - 8.0;

        draw_rectangle(id_x, id_y, 4.0, 4.0, id_color);
    }

    fn draw_ui(&mut self, view: &RenderView) {
        let y_start = 10.0;
        let indicator_size = 12.0;
        let spacing = 25.0;

        let FeatureToggles {
            prediction,
            reconciliation,
            interpolation,
        } = view.toggles;
        let features = [("P", prediction), ("R", reconciliation), ("I", interpolation)];

        for (i, (label, enabled)) in features.iter().enumerate() {
            let x = 10.0 + (i as f32) * spacing;
            let color = if *enabled { GREEN } else { RED };

            draw_rectangle(x, y_start, indicator_size, indicator_size, color);
            draw_rectangle_lines(x, y_start, indicator_size, indicator_size, 1.0, WHITE);

            draw_text(label, x + 3.0, y_start + indicator_size + 12.0, 12.0, WHITE);
        }

        let connection_color = if view.connected { GREEN } else { RED };
        draw_rectangle(10.0, y_start + 35.0, 8.0, 8.0, connection_color);
        draw_text("CON", 20.0, y_start + 35.0 + 8.0, 12.0, WHITE);

        let ack_text = match view.last_ack {
            Some(ack) => format!("ack {}  pending {}", ack, view.pending_inputs),
            None => format!("ack -  pending {}", view.pending_inputs),
        };
        draw_text(&ack_text, 10.0, y_start + 58.0, 12.0, WHITE);

        let player_text = format!("{} players", view.remotes.len() + 1);
        draw_text(&player_text, 10.0, y_start + 73.0, 12.0, WHITE);
    }
}
