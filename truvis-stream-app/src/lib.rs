//! 资产流式加载的演示程序
//!
//! 提供一个只能在创建线程上使用的 `MockDevice`，以及基于它的图片 / OBJ 模型 Loader。

pub mod device;
pub mod loaders;
