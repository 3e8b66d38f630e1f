// A connected participant, handed by value between the dispatcher,
// a queue, a room, and finally a game session — exclusive ownership by
// move means only one task ever touches a given socket half at a time.
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

#[derive(Debug)]
pub struct Player {
    pub username: String,
    pub score: i64,
    pub reader: OwnedReadHalf,
    pub writer: OwnedWriteHalf,
}

impl Player {
    pub fn new(username: String, score: i64, reader: OwnedReadHalf, writer: OwnedWriteHalf) -> Self {
        Player {
            username,
            score,
            reader,
            writer,
        }
    }
}
