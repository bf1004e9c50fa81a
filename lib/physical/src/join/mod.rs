mod columns;
mod galloping;
mod row_adder;
mod undef;
mod view;
mod zipper;

pub use columns::JoinColumnMapping;
pub use galloping::galloping_join;
pub use row_adder::AddCombinedRow;
pub use undef::{is_compatible, GeneralUndefRanges, LeadingUndefRange, NoUndef, UndefRangeFinder};
pub use view::ColumnSubsetView;
pub use zipper::ZipperJoin;
