pub mod pad;
pub mod reorient;
pub mod resample;
pub mod shift;

pub use pad::*;
pub use reorient::*;
pub use resample::*;
pub use shift::*;

pub trait Transform<T> {
    fn apply(&self, target: &T) -> T;

    fn apply_iter(&self, target: impl Iterator<Item = T>) -> impl Iterator<Item = T> {
        target.map(|t| self.apply(&t))
    }
}

pub trait InvertibleTransform<T>: Transform<T> {
    fn invert(&self, target: &T) -> T;
}
