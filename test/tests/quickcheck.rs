use gnat_alloc_test::{run, Operations};
use quickcheck::quickcheck;

quickcheck! {
    fn random_operation_scripts_never_corrupt_the_heap(ops: Operations) -> bool {
        run(&ops);
        true
    }
}
