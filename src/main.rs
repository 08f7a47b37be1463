fn main() {
    pollster::block_on(ember::run());
}
