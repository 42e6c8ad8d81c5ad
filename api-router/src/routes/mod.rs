pub mod analyze_image;
pub mod debate_turn;
pub mod differential;
pub mod extract_labs;
pub mod health;
pub mod summary;
