mod engine;

mod slow;
