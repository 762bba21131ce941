mod checkpoint_test;
mod loss_test;
