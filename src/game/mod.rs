pub mod command_buffer;
pub mod constants;
pub mod game_loop;
pub mod spatial;
pub mod state;
pub mod systems;
