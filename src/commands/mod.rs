pub mod execute_robot;
pub mod next_run;
pub mod serve;
