pub mod flappy;
