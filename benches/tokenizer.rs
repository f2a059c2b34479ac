use criterion::{Criterion, criterion_group, criterion_main};
use ocra::Registry;

const FQL_INPUT: &str = r#"/users/<str>/"profiles"(<uint>, "alice", nil, 0xdeadbeef, #0123456789abcdef:0001)=<int|str>
/metrics/counter(:ts!int, 1.5e3kb, (1, (2, (3, ...))))=42 % nested tuples
/config/flags(width:4 unsigned, "a\"b")=[be, limit:10]
"#;

const PYTHON_INPUT: &str = r#"@dataclass
class Point(Base):
    '''A point in the plane.'''

    def distance(self, other: "Point") -> float:
        # type: (Point) -> float
        dx = self.x - other.x
        dy = self.y - other.y
        return (dx ** 2 + dy ** 2) ** 0.5

    def __repr__(self):
        return f"Point({self.x!r}, {self.y!r})"
"#;

fn criterion_benchmark(c: &mut Criterion) {
    let registry = Registry::with_builtin_grammars().unwrap();
    let fql = FQL_INPUT.repeat(20);
    let python = PYTHON_INPUT.repeat(20);

    c.bench_function("fql tokenization", |b| {
        b.iter(|| {
            let tokens: Vec<_> = registry.tokenize("fql", &fql).unwrap().collect();
            std::hint::black_box(tokens);
        })
    });

    c.bench_function("python tokenization", |b| {
        b.iter(|| {
            let tokens: Vec<_> = registry.tokenize("python", &python).unwrap().collect();
            std::hint::black_box(tokens);
        })
    });

    c.bench_function("detect language", |b| {
        b.iter(|| std::hint::black_box(registry.detect_language(PYTHON_INPUT)))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
