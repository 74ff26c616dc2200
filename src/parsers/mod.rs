mod lammps;

pub use lammps::{DumpFrames, LammpsDumpParser};

/// 获取所有可用的解析器
pub fn get_all_parsers() -> Vec<Box<dyn crate::utils::parser::TrajectoryParser>> {
    vec![Box::new(LammpsDumpParser::new())]
}
