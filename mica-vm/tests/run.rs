//! End-to-end scenarios: Slate sources compiled with mica-cc and run on
//! the real kernel.

use mica_asm::Image;
use mica_vm::{Exception, Kernel, MachineConfig, VmError};

fn program(source: &str) -> Image {
    mica_cc::compile("test.sl", source).expect("test program compiles")
}

fn capture() -> MachineConfig {
    MachineConfig {
        memory_mb: 32,
        capture_output: true,
        ..MachineConfig::default()
    }
}

fn run_captured(source: &str, config: MachineConfig) -> (i32, Vec<u8>) {
    let image = program(source);
    let mut kernel = Kernel::boot(&image, config, &["test".to_string()]).unwrap();
    let code = kernel.run().unwrap();
    let output = kernel.machine().captured_output().unwrap().to_vec();
    (code, output)
}

#[test]
fn prints_the_ascii_range() {
    let source = "
        int main() {
            int c;
            c = '0';
            while (c <= 'Z') {
                putchar(c);
                c = c + 1;
            }
            exit(0);
        }
    ";
    let (code, output) = run_captured(source, capture());

    assert_eq!(code, 0);
    assert_eq!(output.len(), 43);
    assert_eq!(output, (0x30..=0x5au8).collect::<Vec<u8>>());
}

#[test]
fn sorts_a_linked_list() {
    let source = "
        int* head;

        int node_value(int* n)  { return *n; }
        int* node_next(int* n)  { return (int*)*(n + 1); }
        void node_set_value(int* n, int v) { *n = v; }
        void node_set_next(int* n, int* m) { *(n + 1) = (int)m; }

        void push(int v) {
            int* n;
            n = malloc(8);
            node_set_value(n, v);
            node_set_next(n, head);
            head = n;
        }

        void remove_value(int v) {
            int* n;
            if (node_value(head) == v) {
                head = node_next(head);
                return;
            }
            n = head;
            while ((int)node_next(n)) {
                if (node_value(node_next(n)) == v) {
                    node_set_next(n, node_next(node_next(n)));
                    return;
                }
                n = node_next(n);
            }
        }

        void sort() {
            int swapped;
            int* n;
            int tmp;
            swapped = 1;
            while (swapped) {
                swapped = 0;
                n = head;
                while ((int)node_next(n)) {
                    if (node_value(node_next(n)) < node_value(n)) {
                        tmp = node_value(n);
                        node_set_value(n, node_value(node_next(n)));
                        node_set_value(node_next(n), tmp);
                        swapped = 1;
                    }
                    n = node_next(n);
                }
            }
        }

        void print_int(int n) {
            if (10 <= n)
                print_int(n / 10);
            putchar('0' + n % 10);
        }

        void print_list() {
            int* n;
            n = head;
            while ((int)n) {
                print_int(node_value(n));
                putchar(10);
                n = node_next(n);
            }
        }

        int main() {
            head = (int*)0;
            push(7);  push(8);  push(3);  push(6);
            push(9);  push(16); push(18); push(50);
            push(42); push(31); push(39); push(29);
            push(13); push(0);  push(72); push(51);

            remove_value(9);
            push(4);
            sort();
            print_list();
            exit(0);
        }
    ";
    let (code, output) = run_captured(source, capture());

    assert_eq!(code, 0);
    assert_eq!(
        String::from_utf8(output).unwrap(),
        "0\n3\n4\n6\n7\n8\n13\n16\n18\n29\n31\n39\n42\n50\n51\n72\n"
    );
}

#[test]
fn time_slices_alternate_between_processes() {
    let worker = |c: char| {
        format!(
            "
            int main() {{
                int i;
                i = 0;
                while (i < 2000) {{
                    putchar('{c}');
                    i = i + 1;
                }}
                exit(0);
            }}
        "
        )
    };

    let dir = std::env::temp_dir().join("mica-vm-slice-test");
    std::fs::create_dir_all(&dir).unwrap();
    let a_path = dir.join("a.mx");
    let b_path = dir.join("b.mx");
    program(&worker('a')).save(&a_path).unwrap();
    program(&worker('b')).save(&b_path).unwrap();

    let boot = program("int main() { exit(0); }");
    let config = MachineConfig {
        time_slice: 3_000,
        ..capture()
    };
    let mut kernel = Kernel::boot(&boot, config, &["kernel".to_string()]).unwrap();
    kernel.spawn(a_path.to_str().unwrap()).unwrap();
    kernel.spawn(b_path.to_str().unwrap()).unwrap();
    kernel.run().unwrap();

    let output = kernel.machine().captured_output().unwrap().to_vec();
    assert_eq!(output.iter().filter(|&&b| b == b'a').count(), 2000);
    assert_eq!(output.iter().filter(|&&b| b == b'b').count(), 2000);

    // both workers made progress before either finished
    let runs = output
        .windows(2)
        .filter(|pair| pair[0] != pair[1])
        .count();
    assert!(runs >= 3, "expected interleaved runs, got {runs} switches");
}

#[test]
fn lock_waiters_resume_in_fifo_order() {
    let holder = "
        int main() {
            int i;
            mlock();
            putchar('A');
            i = 0;
            while (i < 30000)
                i = i + 1;
            munlock();
            exit(0);
        }
    ";
    let waiter = |c: char| {
        format!(
            "
            int main() {{
                mlock();
                putchar('{c}');
                munlock();
                exit(0);
            }}
        "
        )
    };

    let dir = std::env::temp_dir().join("mica-vm-lock-test");
    std::fs::create_dir_all(&dir).unwrap();
    let p1 = dir.join("p1.mx");
    let p2 = dir.join("p2.mx");
    let p3 = dir.join("p3.mx");
    program(holder).save(&p1).unwrap();
    program(&waiter('B')).save(&p2).unwrap();
    program(&waiter('C')).save(&p3).unwrap();

    let boot = program("int main() { exit(0); }");
    let config = MachineConfig {
        time_slice: 10_000,
        ..capture()
    };
    let mut kernel = Kernel::boot(&boot, config, &["kernel".to_string()]).unwrap();
    kernel.spawn(p1.to_str().unwrap()).unwrap();
    kernel.spawn(p2.to_str().unwrap()).unwrap();
    kernel.spawn(p3.to_str().unwrap()).unwrap();
    kernel.run().unwrap();

    let output = kernel.machine().captured_output().unwrap().to_vec();
    assert_eq!(String::from_utf8(output).unwrap(), "ABC");
    assert_eq!(kernel.lock().owner(), None);
}

#[test]
fn heap_overflow_is_exception_four() {
    let source = "
        int main() {
            malloc(8 * 1024 * 1024);
            exit(0);
        }
    ";
    let image = program(source);
    let mut kernel = Kernel::boot(&image, capture(), &["test".to_string()]).unwrap();

    match kernel.run() {
        Err(VmError::Exception(Exception::HeapOverflow)) => {}
        other => panic!("expected heap overflow, got {other:?}"),
    }
    assert_eq!(Exception::HeapOverflow.code(), 4);
}

#[test]
fn arguments_reach_main() {
    let source = "
        int main(int argc, int* argv) {
            exit(argc);
        }
    ";
    let image = program(source);
    let args: Vec<String> = ["prog", "one", "two"].iter().map(|s| s.to_string()).collect();
    let mut kernel = Kernel::boot(&image, capture(), &args).unwrap();

    assert_eq!(kernel.run().unwrap(), 3);
}

#[test]
fn yield_with_no_other_process_keeps_running() {
    let source = "
        int main() {
            sched_yield();
            sched_yield();
            exit(7);
        }
    ";
    let (code, _) = run_captured(source, capture());
    assert_eq!(code, 7);
}

#[test]
fn signal_reports_schedule_after_a_timeslice_expiry() {
    // munlock leaves the pending action at Unlock; the spin loop then
    // runs well past the slice, and the expiry preemption must bring
    // the action back to Schedule (0) before signal reads it
    let source = "
        int main() {
            int i;
            mlock();
            munlock();
            i = 0;
            while (i < 30000)
                i = i + 1;
            exit(signal());
        }
    ";
    let config = MachineConfig {
        time_slice: 10_000,
        ..capture()
    };
    let (code, _) = run_captured(source, config);
    assert_eq!(code, 0, "signal must read the tick-expiry Schedule action");
}

#[test]
fn getpid_reports_zero_for_the_bootstrap_process() {
    let source = "
        int main() {
            exit(getpid());
        }
    ";
    let (code, _) = run_captured(source, capture());
    assert_eq!(code, 0);
}

#[test]
fn division_by_zero_raises_the_signal_exception() {
    let source = "
        int main() {
            int a;
            a = 1 / 0;
            exit(a);
        }
    ";
    let image = program(source);
    let mut kernel = Kernel::boot(&image, capture(), &["test".to_string()]).unwrap();

    match kernel.run() {
        Err(VmError::Exception(Exception::Signal)) => {}
        other => panic!("expected signal, got {other:?}"),
    }
}

#[test]
fn emulated_programs_can_write_host_files() {
    let dir = std::env::temp_dir().join("mica-vm-write-test");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("out.txt");
    let path_str = path.to_str().unwrap();

    let source = format!(
        "
        int main() {{
            int fd;
            fd = open(\"{path_str}\", 1, 420);
            write(fd, \"hello\", 5);
            exit(0);
        }}
    "
    );
    let (code, _) = run_captured(&source, capture());

    assert_eq!(code, 0);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
    std::fs::remove_file(&path).unwrap();
}
